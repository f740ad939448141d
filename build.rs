use convert_case::{Case, Casing};
use std::io::Write;
use std::{fs::File, io, path::Path};

use serde::Deserialize;

const PERMISSION_FILE: &str = "path_permission_cfg.json";

#[derive(Deserialize)]
struct AppPermissions {
    app_permissions: Vec<Route>,
}

#[derive(Deserialize)]
struct Route {
    route: String,
    sub_route: Vec<SubRoute>,
}

#[derive(Deserialize)]
struct SubRoute {
    path: String,
    permissions: Vec<Permission>,
}

#[derive(Deserialize)]
struct Permission {
    method: String,
    role: String,
}

impl Route {
    fn field_name(&self) -> String {
        self.route.trim_start_matches('/').to_owned()
    }

    fn struct_name(&self) -> String {
        self.field_name().to_case(Case::Pascal) + "Path"
    }
}

fn main() -> io::Result<()> {
    println!("cargo:rerun-if-changed={PERMISSION_FILE}");
    println!("cargo:rerun-if-changed=build.rs");
    let permission_file = File::open(PERMISSION_FILE)?;
    let app_permissions: AppPermissions = serde_json::from_reader(permission_file)?;
    let out = Path::new("./src").join("application_path_gen.rs");
    let mut out = File::create(out)?;
    write_header(&mut out)?;
    for route in app_permissions.app_permissions.iter() {
        write_route(&mut out, route)?;
    }
    write!(
        out,
        "
#[derive(Default)]
pub struct PrivatePath {{
"
    )?;
    for route in app_permissions.app_permissions.iter() {
        writeln!(
            out,
            "    pub {}_path: {},",
            route.field_name(),
            route.struct_name()
        )?;
    }
    writeln!(out, "}}")?;
    Ok(())
}

fn write_header(out: &mut File) -> io::Result<()> {
    writeln!(out, "// auto generated application permissions, see {PERMISSION_FILE}")?;
    writeln!(
        out,
        "#[macro_export]
macro_rules! impl_application_path {{
    ($n:ident) => {{
        impl $crate::server::path_control::ApplicationPath for $n {{
            fn root_path(&self) -> String {{
                self.route.clone()
            }}
            fn inject_auth_router(
                self,
                router: axum::Router<$crate::server::AppState>,
            ) -> axum::Router<$crate::server::AppState> {{
                let cloned = std::sync::Arc::new(self)
                    as std::sync::Arc<dyn $crate::server::path_control::ApplicationPath>;
                router.route_layer(axum::middleware::from_fn_with_state(
                    cloned,
                    $crate::server::middleware::auth,
                ))
            }}
            fn get_matcher(
                &self,
            ) -> &matchit::Router<
                std::collections::HashMap<axum::http::Method, $crate::db::auth::UserRole>,
            > {{
                &self.matcher
            }}
        }}
    }};
}}"
    )
}

fn write_route(out: &mut File, route: &Route) -> io::Result<()> {
    let struct_name = route.struct_name();
    write!(
        out,
        "
#[derive(Clone)]
pub struct {struct_name} {{
    pub route: String,
    matcher: matchit::Router<std::collections::HashMap<axum::http::Method, crate::db::auth::UserRole>>,
}}

impl Default for {struct_name} {{
    fn default() -> Self {{
        let mut matcher = matchit::Router::new();
"
    )?;
    for sub in route.sub_route.iter() {
        write!(
            out,
            "        matcher
            .insert(
                \"{}\",
                std::collections::HashMap::from([",
            sub.path
        )?;
        for permission in sub.permissions.iter() {
            write!(
                out,
                "
                    (axum::http::Method::{}, crate::db::auth::UserRole::{}),",
                permission.method,
                permission.role.to_case(Case::Pascal)
            )?;
        }
        writeln!(
            out,
            "
                ]),
            )
            .unwrap();"
        )?;
    }
    writeln!(
        out,
        "        Self {{
            route: String::from(\"{}\"),
            matcher,
        }}
    }}
}}

impl_application_path!({struct_name});",
        route.route
    )
}

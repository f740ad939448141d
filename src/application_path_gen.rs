// auto generated application permissions, see path_permission_cfg.json
#[macro_export]
macro_rules! impl_application_path {
    ($n:ident) => {
        impl $crate::server::path_control::ApplicationPath for $n {
            fn root_path(&self) -> String {
                self.route.clone()
            }
            fn inject_auth_router(
                self,
                router: axum::Router<$crate::server::AppState>,
            ) -> axum::Router<$crate::server::AppState> {
                let cloned = std::sync::Arc::new(self)
                    as std::sync::Arc<dyn $crate::server::path_control::ApplicationPath>;
                router.route_layer(axum::middleware::from_fn_with_state(
                    cloned,
                    $crate::server::middleware::auth,
                ))
            }
            fn get_matcher(
                &self,
            ) -> &matchit::Router<
                std::collections::HashMap<axum::http::Method, $crate::db::auth::UserRole>,
            > {
                &self.matcher
            }
        }
    };
}

#[derive(Clone)]
pub struct HealthCheckPath {
    pub route: String,
    matcher: matchit::Router<std::collections::HashMap<axum::http::Method, crate::db::auth::UserRole>>,
}

impl Default for HealthCheckPath {
    fn default() -> Self {
        let mut matcher = matchit::Router::new();
        matcher
            .insert(
                "/",
                std::collections::HashMap::from([
                    (axum::http::Method::GET, crate::db::auth::UserRole::Visitor),
                ]),
            )
            .unwrap();
        Self {
            route: String::from("/health_check"),
            matcher,
        }
    }
}

impl_application_path!(HealthCheckPath);

#[derive(Clone)]
pub struct UserInfoPath {
    pub route: String,
    matcher: matchit::Router<std::collections::HashMap<axum::http::Method, crate::db::auth::UserRole>>,
}

impl Default for UserInfoPath {
    fn default() -> Self {
        let mut matcher = matchit::Router::new();
        matcher
            .insert(
                "/",
                std::collections::HashMap::from([
                    (axum::http::Method::GET, crate::db::auth::UserRole::Visitor),
                ]),
            )
            .unwrap();
        Self {
            route: String::from("/user_info"),
            matcher,
        }
    }
}

impl_application_path!(UserInfoPath);

#[derive(Clone)]
pub struct ControlPath {
    pub route: String,
    matcher: matchit::Router<std::collections::HashMap<axum::http::Method, crate::db::auth::UserRole>>,
}

impl Default for ControlPath {
    fn default() -> Self {
        let mut matcher = matchit::Router::new();
        matcher
            .insert(
                "/",
                std::collections::HashMap::from([
                    (axum::http::Method::GET, crate::db::auth::UserRole::Viewer),
                ]),
            )
            .unwrap();
        Self {
            route: String::from("/control"),
            matcher,
        }
    }
}

impl_application_path!(ControlPath);

#[derive(Clone)]
pub struct CompaniesPath {
    pub route: String,
    matcher: matchit::Router<std::collections::HashMap<axum::http::Method, crate::db::auth::UserRole>>,
}

impl Default for CompaniesPath {
    fn default() -> Self {
        let mut matcher = matchit::Router::new();
        matcher
            .insert(
                "/",
                std::collections::HashMap::from([
                    (axum::http::Method::GET, crate::db::auth::UserRole::Viewer),
                    (axum::http::Method::POST, crate::db::auth::UserRole::Full),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/:id",
                std::collections::HashMap::from([
                    (axum::http::Method::GET, crate::db::auth::UserRole::Viewer),
                ]),
            )
            .unwrap();
        Self {
            route: String::from("/companies"),
            matcher,
        }
    }
}

impl_application_path!(CompaniesPath);

#[derive(Clone)]
pub struct WarehousesPath {
    pub route: String,
    matcher: matchit::Router<std::collections::HashMap<axum::http::Method, crate::db::auth::UserRole>>,
}

impl Default for WarehousesPath {
    fn default() -> Self {
        let mut matcher = matchit::Router::new();
        matcher
            .insert(
                "/",
                std::collections::HashMap::from([
                    (axum::http::Method::GET, crate::db::auth::UserRole::Viewer),
                    (axum::http::Method::POST, crate::db::auth::UserRole::Full),
                ]),
            )
            .unwrap();
        Self {
            route: String::from("/warehouses"),
            matcher,
        }
    }
}

impl_application_path!(WarehousesPath);

#[derive(Clone)]
pub struct InventoryPath {
    pub route: String,
    matcher: matchit::Router<std::collections::HashMap<axum::http::Method, crate::db::auth::UserRole>>,
}

impl Default for InventoryPath {
    fn default() -> Self {
        let mut matcher = matchit::Router::new();
        matcher
            .insert(
                "/",
                std::collections::HashMap::from([
                    (axum::http::Method::GET, crate::db::auth::UserRole::Viewer),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/operations/:sku",
                std::collections::HashMap::from([
                    (axum::http::Method::GET, crate::db::auth::UserRole::Viewer),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/quantity/:sku",
                std::collections::HashMap::from([
                    (axum::http::Method::GET, crate::db::auth::UserRole::Viewer),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/adjustments",
                std::collections::HashMap::from([
                    (axum::http::Method::POST, crate::db::auth::UserRole::Full),
                ]),
            )
            .unwrap();
        Self {
            route: String::from("/inventory"),
            matcher,
        }
    }
}

impl_application_path!(InventoryPath);

#[derive(Clone)]
pub struct ReceiptsPath {
    pub route: String,
    matcher: matchit::Router<std::collections::HashMap<axum::http::Method, crate::db::auth::UserRole>>,
}

impl Default for ReceiptsPath {
    fn default() -> Self {
        let mut matcher = matchit::Router::new();
        matcher
            .insert(
                "/",
                std::collections::HashMap::from([
                    (axum::http::Method::GET, crate::db::auth::UserRole::Viewer),
                    (axum::http::Method::POST, crate::db::auth::UserRole::Editor),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/:id",
                std::collections::HashMap::from([
                    (axum::http::Method::GET, crate::db::auth::UserRole::Viewer),
                    (axum::http::Method::PUT, crate::db::auth::UserRole::Editor),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/:id/start",
                std::collections::HashMap::from([
                    (axum::http::Method::POST, crate::db::auth::UserRole::Editor),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/:id/counts",
                std::collections::HashMap::from([
                    (axum::http::Method::POST, crate::db::auth::UserRole::Editor),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/:id/verify",
                std::collections::HashMap::from([
                    (axum::http::Method::POST, crate::db::auth::UserRole::Editor),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/:id/approve_differences",
                std::collections::HashMap::from([
                    (axum::http::Method::POST, crate::db::auth::UserRole::Full),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/:id/approve",
                std::collections::HashMap::from([
                    (axum::http::Method::POST, crate::db::auth::UserRole::Editor),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/:id/reject",
                std::collections::HashMap::from([
                    (axum::http::Method::POST, crate::db::auth::UserRole::Full),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/:id/recount",
                std::collections::HashMap::from([
                    (axum::http::Method::POST, crate::db::auth::UserRole::Editor),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/:id/reopen",
                std::collections::HashMap::from([
                    (axum::http::Method::POST, crate::db::auth::UserRole::Editor),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/:id/cancel",
                std::collections::HashMap::from([
                    (axum::http::Method::POST, crate::db::auth::UserRole::Editor),
                ]),
            )
            .unwrap();
        Self {
            route: String::from("/receipts"),
            matcher,
        }
    }
}

impl_application_path!(ReceiptsPath);

#[derive(Clone)]
pub struct OrdersPath {
    pub route: String,
    matcher: matchit::Router<std::collections::HashMap<axum::http::Method, crate::db::auth::UserRole>>,
}

impl Default for OrdersPath {
    fn default() -> Self {
        let mut matcher = matchit::Router::new();
        matcher
            .insert(
                "/",
                std::collections::HashMap::from([
                    (axum::http::Method::GET, crate::db::auth::UserRole::Viewer),
                    (axum::http::Method::POST, crate::db::auth::UserRole::Editor),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/:id",
                std::collections::HashMap::from([
                    (axum::http::Method::GET, crate::db::auth::UserRole::Viewer),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/:id/invoice",
                std::collections::HashMap::from([
                    (axum::http::Method::POST, crate::db::auth::UserRole::Editor),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/:id/cancel",
                std::collections::HashMap::from([
                    (axum::http::Method::POST, crate::db::auth::UserRole::Editor),
                ]),
            )
            .unwrap();
        Self {
            route: String::from("/orders"),
            matcher,
        }
    }
}

impl_application_path!(OrdersPath);

#[derive(Clone)]
pub struct AwbsPath {
    pub route: String,
    matcher: matchit::Router<std::collections::HashMap<axum::http::Method, crate::db::auth::UserRole>>,
}

impl Default for AwbsPath {
    fn default() -> Self {
        let mut matcher = matchit::Router::new();
        matcher
            .insert(
                "/",
                std::collections::HashMap::from([
                    (axum::http::Method::GET, crate::db::auth::UserRole::Viewer),
                    (axum::http::Method::POST, crate::db::auth::UserRole::Editor),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/:awb_number",
                std::collections::HashMap::from([
                    (axum::http::Method::GET, crate::db::auth::UserRole::Viewer),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/:awb_number/tracking",
                std::collections::HashMap::from([
                    (axum::http::Method::POST, crate::db::auth::UserRole::Editor),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/:awb_number/cancel",
                std::collections::HashMap::from([
                    (axum::http::Method::POST, crate::db::auth::UserRole::Editor),
                ]),
            )
            .unwrap();
        Self {
            route: String::from("/awbs"),
            matcher,
        }
    }
}

impl_application_path!(AwbsPath);

#[derive(Clone)]
pub struct HandoversPath {
    pub route: String,
    matcher: matchit::Router<std::collections::HashMap<axum::http::Method, crate::db::auth::UserRole>>,
}

impl Default for HandoversPath {
    fn default() -> Self {
        let mut matcher = matchit::Router::new();
        matcher
            .insert(
                "/",
                std::collections::HashMap::from([
                    (axum::http::Method::GET, crate::db::auth::UserRole::Viewer),
                    (axum::http::Method::POST, crate::db::auth::UserRole::Editor),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/auto_finalize",
                std::collections::HashMap::from([
                    (axum::http::Method::POST, crate::db::auth::UserRole::Full),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/:id",
                std::collections::HashMap::from([
                    (axum::http::Method::GET, crate::db::auth::UserRole::Viewer),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/:id/scan",
                std::collections::HashMap::from([
                    (axum::http::Method::POST, crate::db::auth::UserRole::Editor),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/:id/scan/:awb_number",
                std::collections::HashMap::from([
                    (axum::http::Method::DELETE, crate::db::auth::UserRole::Editor),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/:id/report",
                std::collections::HashMap::from([
                    (axum::http::Method::GET, crate::db::auth::UserRole::Viewer),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/:id/finalize",
                std::collections::HashMap::from([
                    (axum::http::Method::POST, crate::db::auth::UserRole::Editor),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/:id/reopen",
                std::collections::HashMap::from([
                    (axum::http::Method::POST, crate::db::auth::UserRole::Full),
                ]),
            )
            .unwrap();
        Self {
            route: String::from("/handovers"),
            matcher,
        }
    }
}

impl_application_path!(HandoversPath);

#[derive(Clone)]
pub struct SettlementsPath {
    pub route: String,
    matcher: matchit::Router<std::collections::HashMap<axum::http::Method, crate::db::auth::UserRole>>,
}

impl Default for SettlementsPath {
    fn default() -> Self {
        let mut matcher = matchit::Router::new();
        matcher
            .insert(
                "/",
                std::collections::HashMap::from([
                    (axum::http::Method::GET, crate::db::auth::UserRole::Viewer),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/run",
                std::collections::HashMap::from([
                    (axum::http::Method::POST, crate::db::auth::UserRole::Full),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/:id",
                std::collections::HashMap::from([
                    (axum::http::Method::GET, crate::db::auth::UserRole::Viewer),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/:id/issue",
                std::collections::HashMap::from([
                    (axum::http::Method::POST, crate::db::auth::UserRole::Full),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/:id/paid",
                std::collections::HashMap::from([
                    (axum::http::Method::POST, crate::db::auth::UserRole::Full),
                ]),
            )
            .unwrap();
        matcher
            .insert(
                "/:id/cancel",
                std::collections::HashMap::from([
                    (axum::http::Method::POST, crate::db::auth::UserRole::Full),
                ]),
            )
            .unwrap();
        Self {
            route: String::from("/settlements"),
            matcher,
        }
    }
}

impl_application_path!(SettlementsPath);

#[derive(Default)]
pub struct PrivatePath {
    pub health_check_path: HealthCheckPath,
    pub user_info_path: UserInfoPath,
    pub control_path: ControlPath,
    pub companies_path: CompaniesPath,
    pub warehouses_path: WarehousesPath,
    pub inventory_path: InventoryPath,
    pub receipts_path: ReceiptsPath,
    pub orders_path: OrdersPath,
    pub awbs_path: AwbsPath,
    pub handovers_path: HandoversPath,
    pub settlements_path: SettlementsPath,
}

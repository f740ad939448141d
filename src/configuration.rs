use chrono::NaiveTime;
use chrono_tz::Tz;
use secrecy::{ExposeSecret, Secret};

#[derive(serde::Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application_port: u16,
    pub access_expiration: u32,
    pub refresh_expiration: u32,
    pub signup_secret: Secret<String>,
    pub access_token_secret: Secret<String>,
    pub refresh_token_secret: Secret<String>,
    pub business_timezone: String,
    pub lock_backend: LockBackend,
    pub scheduler: SchedulerSettings,
    pub notify: NotifySettings,
}

impl Settings {
    /// the zone every business day (handover date, settlement period) is evaluated in.
    pub fn business_tz(&self) -> Tz {
        // validated in `get_configuration`
        parse_timezone(&self.business_timezone).unwrap_or(chrono_tz::Europe::Bucharest)
    }
}

#[derive(serde::Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    Database,
    Memory,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct SchedulerSettings {
    pub enabled: bool,
    pub tick_seconds: u64,
    pub auto_finalize_at: String,
    pub settlement_day_of_month: u32,
    pub settlement_at: String,
}

impl SchedulerSettings {
    pub fn auto_finalize_time(&self) -> NaiveTime {
        parse_clock_time(&self.auto_finalize_at).unwrap_or(NaiveTime::MIN)
    }

    pub fn settlement_time(&self) -> NaiveTime {
        parse_clock_time(&self.settlement_at).unwrap_or(NaiveTime::MIN)
    }

    fn validate(&self) -> Result<(), String> {
        parse_clock_time(&self.auto_finalize_at)?;
        parse_clock_time(&self.settlement_at)?;
        if !(1..=28).contains(&self.settlement_day_of_month) {
            return Err(format!(
                "settlement_day_of_month must be within 1..=28, got {}",
                self.settlement_day_of_month
            ));
        }
        if self.tick_seconds == 0 {
            return Err(String::from("tick_seconds must be positive"));
        }
        Ok(())
    }
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct NotifySettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub target: String,
}

impl NotifySettings {
    pub fn get_service_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(serde::Deserialize)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: Secret<String>,
    pub port: u16,
    pub host: String,
    pub database_name: String,
    pub use_srv: bool,
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let base_path = std::env::current_dir().expect("Failed to determine current directory");
    let configuration_path = base_path.join("configuration");
    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;
    let env_config = config::Environment::with_prefix("bo").separator("__");
    let settings = config::Config::builder()
        .add_source(config::File::from(configuration_path.join("base")).required(true))
        .add_source(
            config::File::from(configuration_path.join(environment.as_str())).required(true),
        )
        .add_source(env_config)
        .build()?;
    let settings = settings.try_deserialize::<Settings>()?;
    parse_timezone(&settings.business_timezone).map_err(config::ConfigError::Message)?;
    settings
        .scheduler
        .validate()
        .map_err(config::ConfigError::Message)?;
    Ok(settings)
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> Secret<String> {
        let DatabaseSettings {
            username,
            password,
            port,
            host,
            database_name: _,
            use_srv,
        } = self;
        let credentials = if username.is_empty() {
            String::new()
        } else {
            format!("{username}:{}@", password.expose_secret())
        };
        if *use_srv {
            return Secret::new(format!("mongodb+srv://{credentials}{host}"));
        }
        Secret::new(format!("mongodb://{credentials}{host}:{port}"))
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz, String> {
    name.trim()
        .parse::<Tz>()
        .map_err(|e| format!("invalid business_timezone {name}: {e}"))
}

/// "HH:MM" wall clock time
pub fn parse_clock_time(input: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(input.trim(), "%H:%M")
        .map_err(|_| format!("{input} is not a HH:MM time"))
}

pub enum Environment {
    Local,
    Preview,
    Production,
}
impl Environment {
    fn as_str(&self) -> &str {
        match self {
            Environment::Local => "local",
            Environment::Preview => "preview",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "preview" => Ok(Self::Preview),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not supported environment. use either `local`,`preview` or `production` instead.",
                other
            )),
        }
    }
}

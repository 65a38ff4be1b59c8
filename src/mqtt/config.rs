use std::fmt;
use std::time::Duration;

/// Everything the transport needs to open one broker session.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub use_tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub clean_session: bool,
    pub keep_alive: Duration,
    /// Pause between failed connection attempts
    pub reconnect_delay: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: String::new(),
            use_tls: false,
            username: None,
            password: None,
            clean_session: true,
            keep_alive: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

impl fmt::Display for ConnectOptions {
    /// Formats as `user@host:port`, leaving the password out
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let scheme = if self.use_tls { "mqtts" } else { "mqtt" };
        match &self.username {
            Some(user) => write!(f, "{}://{}@{}:{}", scheme, user, self.host, self.port),
            None => write!(f, "{}://{}:{}", scheme, self.host, self.port),
        }
    }
}

use log::info;

/// Hands out [zbus::Connection]s, creating each bus connection on first use.
/// Connections are reference counted internally, so the same connection is
/// cloned for every caller.
#[derive(Default)]
pub struct ConnectionFactory {
    system: Option<zbus::Connection>,
    session: Option<zbus::Connection>,
}

impl ConnectionFactory {
    /// No connections are made until one is requested.
    pub fn new() -> ConnectionFactory {
        ConnectionFactory::default()
    }

    /// Connection to the system-wide D-Bus, where logind and UPower live
    pub async fn get_system(&mut self) -> zbus::Result<zbus::Connection> {
        match &self.system {
            Some(connection) => Ok(connection.clone()),
            None => {
                info!("Connecting to the system bus");
                let connection = zbus::Connection::system().await?;
                self.system = Some(connection.clone());
                Ok(connection)
            }
        }
    }

    /// Connection to the user's session bus
    pub async fn get_session(&mut self) -> zbus::Result<zbus::Connection> {
        match &self.session {
            Some(connection) => Ok(connection.clone()),
            None => {
                info!("Connecting to the session bus");
                let connection = zbus::Connection::session().await?;
                self.session = Some(connection.clone());
                Ok(connection)
            }
        }
    }
}

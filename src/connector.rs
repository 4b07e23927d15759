//! NETCONF-over-ssh transport for the reconciliation engine

use netconf::{ErrorCategory, Session, SshConfig};
use reconcile::{
    CommitStatus, Connector, Credential, Device, DeviceError, Reply, Request, Transport,
};
use std::time::Duration;

/// Opens NETCONF sessions with the system ssh client
pub struct NetconfConnector {
    ssh_program: String,
}

impl NetconfConnector {
    pub fn new(ssh_program: impl Into<String>) -> Self {
        Self {
            ssh_program: ssh_program.into(),
        }
    }

    fn ssh_config(&self, device: &Device, credential: &Credential, timeout: Duration) -> SshConfig {
        let mut config = SshConfig::new(&device.host, device.port, &credential.username);
        config.program.clone_from(&self.ssh_program);
        config.password.clone_from(&credential.password);
        config.identity_file.clone_from(&credential.identity_file);
        config.connect_timeout = timeout;
        config.rpc_timeout = timeout;
        config
    }
}

impl Connector for NetconfConnector {
    fn connect(
        &self,
        device: &Device,
        credential: &Credential,
        timeout: Duration,
    ) -> Result<Box<dyn Transport>, DeviceError> {
        let config = self.ssh_config(device, credential, timeout);
        let session = Session::connect(&config).map_err(device_error)?;
        if let Some(id) = session.session_id() {
            log::debug!("{}: NETCONF session {}", device.name, id);
        }
        Ok(Box::new(NetconfTransport::new(session)))
    }
}

/// One open NETCONF session
pub struct NetconfTransport {
    session: Session,
}

impl NetconfTransport {
    pub fn new(session: Session) -> Self {
        Self { session }
    }
}

impl Transport for NetconfTransport {
    fn execute(&mut self, request: &Request) -> Result<Reply, DeviceError> {
        let session = &mut self.session;
        let reply = match request {
            Request::GetConfiguration { scope } => {
                let roots: Vec<&str> = scope.roots().iter().map(|r| r.as_str()).collect();
                Reply::Config(session.get_configuration(&roots).map_err(device_error)?)
            }
            Request::Lock => session.lock().map(|()| Reply::Ack).map_err(device_error)?,
            Request::LoadConfiguration { text } => session
                .load_set(text)
                .map(|()| Reply::Ack)
                .map_err(device_error)?,
            Request::Diff => Reply::Diff(session.compare().map_err(device_error)?),
            Request::Commit { comment } => {
                let committed = session.commit(comment).map_err(device_error)?;
                Reply::Commit(if committed {
                    CommitStatus::Committed
                } else {
                    CommitStatus::NoEffect
                })
            }
            Request::Discard => session.discard().map(|()| Reply::Ack).map_err(device_error)?,
            Request::Unlock => session.unlock().map(|()| Reply::Ack).map_err(device_error)?,
        };
        Ok(reply)
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.session.close().map_err(device_error)
    }
}

/// Map a NETCONF failure onto the engine's taxonomy
///
/// Lock denials stay lock errors whichever request hit them; everything else
/// is re-labelled by the session according to the request that failed.
fn device_error(error: netconf::Error) -> DeviceError {
    let category = error.category();
    let message = error.to_string();
    match category {
        ErrorCategory::Lock => DeviceError::lock(message),
        c if c.is_transport() => {
            DeviceError::connection(format!("{}: {}", c.description(), message))
        }
        _ => DeviceError::unexpected(message),
    }
}

use std::fmt;

/// Which parser produced an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// A `DCC <CMD> <args>` CTCP request received over the IRC connection.
    Dcc,
    /// A chat line read from a direct peer socket.
    DccMessage,
    NickServ,
    Generic,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Dcc => "DCC",
            Protocol::DccMessage => "DCCMSG",
            Protocol::NickServ => "NSERV",
            Protocol::Generic => "GEN",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed unit of inbound traffic. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    sender: String,
    command: String,
    target: String,
    message: String,
    protocol: Protocol,
}

impl Event {
    pub fn new(
        sender: impl Into<String>,
        command: impl Into<String>,
        target: impl Into<String>,
        message: impl Into<String>,
        protocol: Protocol,
    ) -> Self {
        Self {
            sender: sender.into(),
            command: command.into(),
            target: target.into(),
            message: message.into(),
            protocol,
        }
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<6} S: {:<25} C: {:<15} T: {} M: {}",
            self.protocol.as_str(),
            self.sender,
            self.command,
            self.target,
            self.message
        )
    }
}

//! Channel numbering used by the Kubernetes streaming endpoints.

/// Selects how the first message of each channel is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamMode {
    /// exec / attach: every message is `[channel] ++ payload`.
    #[default]
    Exec,
    /// port-forward: the first message of each channel carries a 2-byte port
    /// number after the channel id.
    PortForward,
}

impl StreamMode {
    pub fn has_port_prefix(self) -> bool {
        matches!(self, StreamMode::PortForward)
    }
}

pub const STDIN: u8 = 0;
pub const STDOUT: u8 = 1;
pub const STDERR: u8 = 2;
/// Carries the final status of an exec call.
pub const ERROR: u8 = 3;
/// Terminal resize events.
pub const RESIZE: u8 = 4;

/// Data channel for the `index`th forwarded port.
pub const fn port_forward_data(index: u8) -> u8 {
    index * 2
}

/// Error channel for the `index`th forwarded port.
pub const fn port_forward_error(index: u8) -> u8 {
    index * 2 + 1
}

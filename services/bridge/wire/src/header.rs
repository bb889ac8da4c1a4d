//! Command ids and response types carried in the 5-byte frame header.
//!
//! ```text
//! +---------+------------------+-----------------+------------------+
//! | u8 addr | u16 BE resp type | u16 BE command  | params (0..N)    |
//! +---------+------------------+-----------------+------------------+
//! ```

use std::fmt;

/// Size of the fixed frame header in bytes
pub const HEADER_SIZE: usize = 5;

/// Commands understood by the mesh
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// On/off state change
    StateChange = 0x0097,
    /// Dim level change
    DimChange = 0x00C8,
    /// Dim level change, second variant used by newer firmware
    Dim2Change = 0x0098,
    /// Scene triggered
    SceneTrigger = 0x0021,
    /// Mesh clock read or update
    TimeUpdate = 0x001B,
    /// Button press on a remote or wall switch
    RemoteClick = 0x0016,
}

impl Command {
    /// Every command id the mesh recognizes
    pub const ALL: [Command; 6] = [
        Command::StateChange,
        Command::DimChange,
        Command::Dim2Change,
        Command::SceneTrigger,
        Command::TimeUpdate,
        Command::RemoteClick,
    ];

    /// Raw 16-bit id as sent on the wire
    pub fn id(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for Command {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0097 => Ok(Command::StateChange),
            0x00C8 => Ok(Command::DimChange),
            0x0098 => Ok(Command::Dim2Change),
            0x0021 => Ok(Command::SceneTrigger),
            0x001B => Ok(Command::TimeUpdate),
            0x0016 => Ok(Command::RemoteClick),
            other => Err(other),
        }
    }
}

impl From<Command> for u16 {
    fn from(command: Command) -> Self {
        command.id()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(0x{:04x})", self, self.id())
    }
}

/// Whether the addressed device should answer a command
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseType {
    /// Fire and forget
    NoResponse = 0x0110,
    /// Device writes its answer to the data channel
    RequestResponse = 0x0102,
}

impl ResponseType {
    /// Raw 16-bit flag as sent on the wire
    pub fn id(self) -> u16 {
        self as u16
    }
}

impl From<ResponseType> for u16 {
    fn from(response: ResponseType) -> Self {
        response.id()
    }
}

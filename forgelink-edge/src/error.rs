use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum StateError {
    #[error("Node is offline")]
    Offline,
    #[error("Node has not been birthed")]
    UnBirthed,
}

#[derive(Error, Debug)]
pub enum DeviceRegistrationError {
    #[error("Invalid device name: {0}")]
    InvalidName(String),
    #[error("A device with that name is already registered")]
    DuplicateDevice,
}

#[derive(Error, Debug, PartialEq)]
pub enum QueueError {
    #[error("The queue is closed and not accepting new messages")]
    Closed,
}

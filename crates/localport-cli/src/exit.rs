use std::process::ExitCode;

pub const EXIT_OK: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_USAGE: u8 = 2;
pub const EXIT_INTERRUPT: u8 = 130;

pub fn code(value: u8) -> ExitCode {
    ExitCode::from(value)
}

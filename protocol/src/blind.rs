use crate::protos::generated::hub::{BlindControl, BlindDirection};
use anyhow::{anyhow, Result};
use protobuf::Message;
use std::io::Write;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

pub fn blind_control(blind: &str, segment: &str, direction: BlindDirection) -> BlindControl {
    let mut msg = BlindControl::new();
    msg.set_blind(blind.to_owned());
    msg.set_segment(segment.to_owned());
    msg.set_direction(direction);
    msg
}

/// Opens a connection to the blind controller, sends a single command and closes it.
/// The controller treats the end of stream as the end of the command.
pub fn send_blind_command(addr: &str, blind: &str, segment: &str, direction: BlindDirection) -> Result<()> {
    let target = addr
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| anyhow!("blind controller address {} did not resolve", addr))?;
    let mut stream = TcpStream::connect_timeout(&target, CONNECT_TIMEOUT)?;
    stream.set_write_timeout(Some(WRITE_TIMEOUT))?;

    let out_bytes: Vec<u8> = blind_control(blind, segment, direction).write_to_bytes()?;
    stream.write_all(&out_bytes)?;
    stream.shutdown(Shutdown::Write)?;
    Ok(())
}

use crate::protos::generated::hub::{AirconControl, AirconRunMode};
use anyhow::Result;
use protobuf::Message;
use std::net::UdpSocket;

/// Builds the controller payload. A damper of `None` leaves the damper where it is.
pub fn aircon_control(mode: AirconRunMode, damper_percent: Option<u8>) -> AirconControl {
    let mut msg = AirconControl::new();
    msg.set_mode(mode);
    if let Some(percent) = damper_percent {
        msg.set_damper_percent(percent as u32);
    }
    msg
}

pub fn send_aircon_control(addr: &str, mode: AirconRunMode, damper_percent: Option<u8>) -> Result<()> {
    let udp = UdpSocket::bind("0.0.0.0:0")?;
    let out_bytes: Vec<u8> = aircon_control(mode, damper_percent).write_to_bytes()?;
    udp.send_to(&out_bytes, addr)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn damper_is_optional() {
        let msg = aircon_control(AirconRunMode::RUN_HEAT, None);
        assert_eq!(msg.mode(), AirconRunMode::RUN_HEAT);
        assert!(!msg.has_damper_percent());

        let msg = aircon_control(AirconRunMode::RUN_COOL, Some(40));
        assert_eq!(msg.damper_percent(), 40);
    }

    #[test]
    fn sends_one_datagram() -> anyhow::Result<()> {
        let rx = UdpSocket::bind("127.0.0.1:0")?;
        let addr = rx.local_addr()?.to_string();
        send_aircon_control(&addr, AirconRunMode::RUN_IDLE, Some(60))?;

        let mut buf = [0u8; 256];
        let (sz, _) = rx.recv_from(&mut buf)?;
        let msg = AirconControl::parse_from_bytes(&buf[..sz])?;
        assert_eq!(msg.mode(), AirconRunMode::RUN_IDLE);
        assert_eq!(msg.damper_percent(), 60);
        Ok(())
    }
}

use anyhow::{bail, Result};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::warn;

const MAX_UDP: usize = 1460;

pub trait MessageHandler<T> {
    fn on_message(&mut self, src: SocketAddr, msg: T) -> anyhow::Result<()>;
}

/// Receives one protobuf message per datagram and hands it to the handler.
/// A bad datagram is logged and dropped; it never stops the loop.
pub struct DatagramListener<'a, T> {
    handler: &'a mut (dyn MessageHandler<T> + Send),
}

impl<'a, T: protobuf::Message> DatagramListener<'a, T> {
    pub fn new(handler: &'a mut (dyn MessageHandler<T> + Send)) -> Self {
        DatagramListener { handler }
    }

    pub async fn main_loop(&mut self, bind_addr: &str) -> Result<()> {
        let socket = UdpSocket::bind(bind_addr).await?;
        let mut buf = [0; MAX_UDP];

        loop {
            let (sz, src) = socket.recv_from(&mut buf).await?;
            if let Err(e) = self.on_datagram(src, &buf[0..sz]) {
                warn!(%src, "dropped datagram: {:#}", e);
            }
        }
    }

    fn on_datagram(&mut self, src: SocketAddr, buf: &[u8]) -> Result<()> {
        if buf.is_empty() {
            bail!("empty datagram");
        }
        let message = T::parse_from_bytes(buf)?;
        self.handler.on_message(src, message)
    }
}

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use super::{FeedbackSource, MediaSink, RtcpFeedbackSink};
use crate::error::Result;
use crate::media::rtcp;

/// Read timeout of the feedback thread, bounding how long [`UdpSink::close`] waits.
const READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Largest datagram the feedback thread accepts.
const MAX_DATAGRAM: usize = 1500;

/// Attachment point for the feedback thread.
#[derive(Default)]
pub struct UdpFeedback {
    sink: Mutex<Option<Arc<dyn RtcpFeedbackSink>>>,
}

impl FeedbackSource for UdpFeedback {
    fn set_feedback_sink(&self, sink: Option<Arc<dyn RtcpFeedbackSink>>) {
        *self.sink.lock() = sink;
    }
}

/// RTP/RTCP over a single UDP socket (RFC 5761 multiplexing).
///
/// Packets go to a fixed destination. Datagrams arriving on the same socket
/// that look like RTCP are handed to the attached feedback sink from a
/// background thread. Anything else is ignored.
pub struct UdpSink {
    socket: Arc<UdpSocket>,
    destination: SocketAddr,
    ssrc: AtomicU32,
    sent: AtomicU64,
    feedback: Arc<UdpFeedback>,
    running: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl UdpSink {
    /// Bind `local` and start reading feedback.
    pub fn bind(local: impl ToSocketAddrs, destination: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(local)?;
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        let local = socket.local_addr()?;
        let socket = Arc::new(socket);
        let feedback = Arc::new(UdpFeedback::default());
        let running = Arc::new(AtomicBool::new(true));

        let reader = {
            let socket = socket.clone();
            let feedback = feedback.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("udp-feedback".into())
                .spawn(move || Self::read_loop(socket, feedback, running))?
        };

        tracing::info!(%local, %destination, "UDP sink bound");

        Ok(Self {
            socket,
            destination,
            ssrc: AtomicU32::new(0),
            sent: AtomicU64::new(0),
            feedback,
            running,
            reader: Mutex::new(Some(reader)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc.load(Ordering::Relaxed)
    }

    pub fn packets_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Stop the feedback thread. Idempotent.
    pub fn close(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.reader.lock().take()
            && handle.join().is_err()
        {
            tracing::warn!("UDP feedback thread panicked");
        }
        tracing::debug!(destination = %self.destination, "UDP sink closed");
    }

    fn read_loop(socket: Arc<UdpSocket>, feedback: Arc<UdpFeedback>, running: Arc<AtomicBool>) {
        let mut buf = [0u8; MAX_DATAGRAM];
        while running.load(Ordering::SeqCst) {
            match socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    let datagram = &buf[..len];
                    if !rtcp::is_rtcp(datagram) {
                        tracing::trace!(%from, len, "ignoring non-RTCP datagram");
                        continue;
                    }
                    // Clone out so the sink runs without our lock held.
                    let sink = feedback.sink.lock().clone();
                    if let Some(sink) = sink {
                        let consumed = sink.deliver_feedback(datagram);
                        tracing::trace!(%from, len, consumed, "RTCP feedback delivered");
                    }
                }
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    if running.load(Ordering::SeqCst) {
                        tracing::warn!(error = %e, "UDP feedback read error");
                    }
                }
            }
        }
        tracing::debug!("UDP feedback loop exited");
    }
}

impl MediaSink for UdpSink {
    fn deliver_encoded_video(&self, data: &[u8]) {
        match self.socket.send_to(data, self.destination) {
            Ok(_) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::warn!(error = %e, destination = %self.destination, "UDP send failed");
            }
        }
    }

    fn set_ssrc(&self, ssrc: u32) {
        self.ssrc.store(ssrc, Ordering::Relaxed);
        tracing::debug!(ssrc = format_args!("{:#010X}", ssrc), "UDP sink SSRC set");
    }

    fn feedback_source(&self) -> Option<Arc<dyn FeedbackSource>> {
        Some(self.feedback.clone())
    }
}

impl Drop for UdpSink {
    fn drop(&mut self) {
        self.close();
    }
}

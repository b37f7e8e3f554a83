use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{DatagramTransport, Received};

/// Smallest receive timeout handed to the OS. A zero timeout means "block
/// forever" for `set_read_timeout`, which would defeat shutdown polling.
const MIN_RECEIVE_TIMEOUT: Duration = Duration::from_millis(1);

/// Largest hop limit accepted by IPv4 TTL and IPv6 hop-limit options.
const MAX_HOP_LIMIT: u32 = 255;

/// IPTOS_LOWDELAY.
const TOS_LOW_DELAY: i32 = 0x10;

/// Whether the socket is connected to its peer or sends with explicit
/// destinations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SocketMode {
    /// Bind only; every transmit names the destination.
    #[default]
    Unconnected,
    /// `connect()` to the peer; the kernel filters inbound datagrams to it.
    Connected,
}

/// Address family preference for resolution and binding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IpMode {
    #[default]
    Any,
    V4,
    V6,
}

impl IpMode {
    fn accepts(self, addr: &SocketAddr) -> bool {
        match self {
            IpMode::Any => true,
            IpMode::V4 => addr.is_ipv4(),
            IpMode::V6 => addr.is_ipv6(),
        }
    }

    fn unspecified(self) -> IpAddr {
        match self {
            IpMode::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            IpMode::Any | IpMode::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }
}

/// Optional OS-level socket options, applied once at setup.
///
/// Failures to apply an option are logged and otherwise ignored; the socket
/// stays usable with the platform default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocketTuning {
    /// `SO_SNDBUF` request in bytes.
    pub send_buffer_bytes: Option<usize>,
    /// `SO_RCVBUF` request in bytes.
    pub recv_buffer_bytes: Option<usize>,
    /// Mark outgoing traffic as low-delay (IP TOS / IPv6 traffic class).
    pub low_delay: bool,
    /// Unicast TTL / hop limit, clamped to 0..=255.
    pub unicast_ttl: Option<u32>,
    /// Multicast TTL / hop limit, clamped to 0..=255.
    pub multicast_ttl: Option<u32>,
    /// Whether multicast datagrams loop back to local sockets.
    pub multicast_loop: Option<bool>,
}

impl SocketTuning {
    /// Tuning suited to a high-rate sender: 128 KiB send buffer, low delay.
    pub fn sender_defaults() -> Self {
        Self {
            send_buffer_bytes: Some(128 * 1024),
            low_delay: true,
            ..Self::default()
        }
    }
}

/// Setup parameters for [`UdpTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpConfig {
    /// Local interface to bind. Defaults to the unspecified address of the
    /// chosen family.
    pub bind_addr: Option<IpAddr>,
    /// Local port to bind. `0` requests an ephemeral port.
    pub local_port: u16,
    /// Remote host name or address. `None` for a receive-only endpoint.
    pub remote_host: Option<String>,
    /// Remote port.
    pub remote_port: u16,
    /// Connected or bind-only operation.
    pub mode: SocketMode,
    /// Address family preference.
    pub ip_mode: IpMode,
    /// OS-level socket tuning.
    pub tuning: SocketTuning,
}

impl UdpConfig {
    /// A receive-only endpoint bound to `local_port` on all interfaces.
    pub fn receiver(local_port: u16) -> Self {
        Self {
            bind_addr: None,
            local_port,
            remote_host: None,
            remote_port: 0,
            mode: SocketMode::Unconnected,
            ip_mode: IpMode::Any,
            tuning: SocketTuning::default(),
        }
    }

    /// A sending endpoint targeting `remote_host:remote_port` from an
    /// ephemeral local port.
    pub fn sender(remote_host: impl Into<String>, remote_port: u16) -> Self {
        Self {
            bind_addr: None,
            local_port: 0,
            remote_host: Some(remote_host.into()),
            remote_port,
            mode: SocketMode::Unconnected,
            ip_mode: IpMode::Any,
            tuning: SocketTuning::sender_defaults(),
        }
    }

    /// Bind the sending socket to a fixed local port.
    pub fn with_local_port(mut self, port: u16) -> Self {
        self.local_port = port;
        self
    }

    /// Choose connected or bind-only operation.
    pub fn with_mode(mut self, mode: SocketMode) -> Self {
        self.mode = mode;
        self
    }

    /// Restrict resolution and binding to one address family.
    pub fn with_ip_mode(mut self, ip_mode: IpMode) -> Self {
        self.ip_mode = ip_mode;
        self
    }

    /// Replace the socket tuning.
    pub fn with_tuning(mut self, tuning: SocketTuning) -> Self {
        self.tuning = tuning;
        self
    }
}

/// UDP datagram transport over `std::net::UdpSocket`.
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
    peer: Option<SocketAddr>,
    mode: SocketMode,
    closed: AtomicBool,
    /// Read timeout currently installed on the socket, in nanoseconds (0 = none).
    installed_timeout_nanos: AtomicU64,
}

impl UdpTransport {
    /// Resolve, bind, tune and (optionally) connect according to `config`.
    ///
    /// With a remote host, every resolved address matching the family
    /// preference is tried in order until one can be bound (and connected).
    pub fn bind(config: &UdpConfig) -> Result<Self> {
        let Some(host) = config.remote_host.as_deref() else {
            let addr = SocketAddr::new(
                config.bind_addr.unwrap_or_else(|| config.ip_mode.unspecified()),
                config.local_port,
            );
            let socket = bind_socket(addr)?;
            apply_tuning(&socket, addr, &config.tuning);
            return Self::from_parts(socket, None, SocketMode::Unconnected);
        };

        let candidates = resolve(host, config.remote_port, config.ip_mode)?;
        let mut last_err = None;

        for remote in candidates {
            let local = SocketAddr::new(
                config.bind_addr.unwrap_or_else(|| unspecified_for(&remote)),
                config.local_port,
            );
            let socket = match bind_socket(local) {
                Ok(socket) => socket,
                Err(err) => {
                    debug!(%remote, error = %err, "bind failed for candidate");
                    last_err = Some(err);
                    continue;
                }
            };
            apply_tuning(&socket, remote, &config.tuning);

            if config.mode == SocketMode::Connected {
                if let Err(source) = socket.connect(remote) {
                    debug!(%remote, error = %source, "connect failed for candidate");
                    last_err = Some(TransportError::Connect {
                        addr: remote,
                        source,
                    });
                    continue;
                }
            }

            return Self::from_parts(socket, Some(remote), config.mode);
        }

        Err(last_err.unwrap_or_else(|| TransportError::Resolve {
            host: host.to_string(),
            port: config.remote_port,
            reason: format!("no {:?} address available", config.ip_mode),
        }))
    }

    fn from_parts(socket: UdpSocket, peer: Option<SocketAddr>, mode: SocketMode) -> Result<Self> {
        let local_addr = socket.local_addr()?;
        info!(%local_addr, ?peer, ?mode, "udp transport ready");
        Ok(Self {
            socket,
            local_addr,
            peer,
            mode,
            closed: AtomicBool::new(false),
            installed_timeout_nanos: AtomicU64::new(0),
        })
    }

    /// The bound local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The resolved peer address, if this endpoint sends.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Connected or bind-only operation.
    pub fn mode(&self) -> SocketMode {
        self.mode
    }

    /// Effective `SO_SNDBUF` reported by the OS.
    pub fn send_buffer_bytes(&self) -> Option<usize> {
        sockopt::get_int(&self.socket, sockopt::SEND_BUFFER).map(|v| v as usize)
    }

    /// Effective `SO_RCVBUF` reported by the OS.
    pub fn recv_buffer_bytes(&self) -> Option<usize> {
        sockopt::get_int(&self.socket, sockopt::RECV_BUFFER).map(|v| v as usize)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn install_timeout(&self, timeout: Duration) -> Result<()> {
        let timeout = timeout.max(MIN_RECEIVE_TIMEOUT);
        let nanos = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        if self.installed_timeout_nanos.load(Ordering::Relaxed) != nanos {
            self.socket.set_read_timeout(Some(timeout))?;
            self.installed_timeout_nanos.store(nanos, Ordering::Relaxed);
        }
        Ok(())
    }
}

impl DatagramTransport for UdpTransport {
    fn transmit(&self, bytes: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        let sent = match (self.mode, self.peer) {
            (SocketMode::Connected, Some(_)) => self.socket.send(bytes)?,
            (SocketMode::Unconnected, Some(peer)) => self.socket.send_to(bytes, peer)?,
            (_, None) => return Err(TransportError::NoDestination),
        };
        Ok(sent)
    }

    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<Received> {
        self.ensure_open()?;
        self.install_timeout(timeout)?;

        match self.socket.recv_from(buf) {
            Ok((len, source)) => Ok(Received::Datagram { len, source }),
            Err(err) => match err.kind() {
                std::io::ErrorKind::WouldBlock
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::Interrupted => Ok(Received::TimedOut),
                // ICMP unreachable from an earlier send on a connected socket;
                // the peer is simply not listening yet.
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::ConnectionReset => {
                    debug!(error = %err, "peer unreachable; treating as timeout");
                    Ok(Received::TimedOut)
                }
                _ if self.closed.load(Ordering::Acquire) => Err(TransportError::Closed),
                _ => Err(TransportError::Io(err)),
            },
        }
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(local_addr = %self.local_addr, "udp transport closed");
        }
    }

    fn transport_name(&self) -> &'static str {
        "udp"
    }
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTransport")
            .field("local_addr", &self.local_addr)
            .field("peer", &self.peer)
            .field("mode", &self.mode)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

fn resolve(host: &str, port: u16, ip_mode: IpMode) -> Result<Vec<SocketAddr>> {
    let resolved = (host, port)
        .to_socket_addrs()
        .map_err(|err| TransportError::Resolve {
            host: host.to_string(),
            port,
            reason: err.to_string(),
        })?;
    let candidates: Vec<SocketAddr> = resolved.filter(|addr| ip_mode.accepts(addr)).collect();
    if candidates.is_empty() {
        return Err(TransportError::Resolve {
            host: host.to_string(),
            port,
            reason: format!("no {ip_mode:?} address available"),
        });
    }
    Ok(candidates)
}

fn unspecified_for(remote: &SocketAddr) -> IpAddr {
    match remote {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}

fn bind_socket(addr: SocketAddr) -> Result<UdpSocket> {
    UdpSocket::bind(addr).map_err(|source| TransportError::Bind { addr, source })
}

/// Apply tuning options. `family_hint` picks between IPv4 and IPv6 options.
fn apply_tuning(socket: &UdpSocket, family_hint: SocketAddr, tuning: &SocketTuning) {
    let report = |option: &str, result: std::io::Result<()>| {
        if let Err(err) = result {
            warn!(option, error = %err, "socket option not applied");
        }
    };

    if let Some(bytes) = tuning.send_buffer_bytes {
        report(
            "send_buffer_bytes",
            sockopt::set_int(socket, sockopt::SEND_BUFFER, clamp_int(bytes)),
        );
    }
    if let Some(bytes) = tuning.recv_buffer_bytes {
        report(
            "recv_buffer_bytes",
            sockopt::set_int(socket, sockopt::RECV_BUFFER, clamp_int(bytes)),
        );
    }
    if tuning.low_delay {
        let option = if family_hint.is_ipv4() {
            sockopt::TOS_V4
        } else {
            sockopt::TCLASS_V6
        };
        report("low_delay", sockopt::set_int(socket, option, TOS_LOW_DELAY));
    }
    if let Some(hops) = tuning.unicast_ttl {
        let hops = hops.min(MAX_HOP_LIMIT);
        let result = if family_hint.is_ipv4() {
            socket.set_ttl(hops)
        } else {
            sockopt::set_int(socket, sockopt::UNICAST_HOPS_V6, hops as i32)
        };
        report("unicast_ttl", result);
    }
    if let Some(hops) = tuning.multicast_ttl {
        let hops = hops.min(MAX_HOP_LIMIT);
        let result = if family_hint.is_ipv4() {
            socket.set_multicast_ttl_v4(hops)
        } else {
            sockopt::set_int(socket, sockopt::MULTICAST_HOPS_V6, hops as i32)
        };
        report("multicast_ttl", result);
    }
    if let Some(enable) = tuning.multicast_loop {
        let result = if family_hint.is_ipv4() {
            socket.set_multicast_loop_v4(enable)
        } else {
            socket.set_multicast_loop_v6(enable)
        };
        report("multicast_loop", result);
    }
}

fn clamp_int(value: usize) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[cfg(unix)]
mod sockopt {
    use std::net::UdpSocket;
    use std::os::fd::AsRawFd;

    /// (level, name) pair for `setsockopt`/`getsockopt`.
    pub type Opt = Option<(libc::c_int, libc::c_int)>;

    pub const SEND_BUFFER: Opt = Some((libc::SOL_SOCKET, libc::SO_SNDBUF));
    pub const RECV_BUFFER: Opt = Some((libc::SOL_SOCKET, libc::SO_RCVBUF));
    pub const TOS_V4: Opt = Some((libc::IPPROTO_IP, libc::IP_TOS));
    #[cfg(target_os = "linux")]
    pub const TCLASS_V6: Opt = Some((libc::IPPROTO_IPV6, libc::IPV6_TCLASS));
    #[cfg(not(target_os = "linux"))]
    pub const TCLASS_V6: Opt = None;
    #[cfg(target_os = "linux")]
    pub const UNICAST_HOPS_V6: Opt = Some((libc::IPPROTO_IPV6, libc::IPV6_UNICAST_HOPS));
    #[cfg(not(target_os = "linux"))]
    pub const UNICAST_HOPS_V6: Opt = None;
    #[cfg(target_os = "linux")]
    pub const MULTICAST_HOPS_V6: Opt = Some((libc::IPPROTO_IPV6, libc::IPV6_MULTICAST_HOPS));
    #[cfg(not(target_os = "linux"))]
    pub const MULTICAST_HOPS_V6: Opt = None;

    pub fn set_int(socket: &UdpSocket, opt: Opt, value: i32) -> std::io::Result<()> {
        let Some((level, name)) = opt else {
            return Err(std::io::Error::from(std::io::ErrorKind::Unsupported));
        };
        let value: libc::c_int = value;
        // SAFETY: `value` lives for the duration of the call and the length
        // matches its size; the descriptor is owned by `socket`.
        let rc = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                level,
                name,
                (&value as *const libc::c_int).cast::<libc::c_void>(),
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    pub fn get_int(socket: &UdpSocket, opt: Opt) -> Option<i32> {
        let (level, name) = opt?;
        let mut value: libc::c_int = 0;
        let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        // SAFETY: `value` and `len` are valid writable pointers for the
        // provided sizes; the descriptor is owned by `socket`.
        let rc = unsafe {
            libc::getsockopt(
                socket.as_raw_fd(),
                level,
                name,
                (&mut value as *mut libc::c_int).cast::<libc::c_void>(),
                &mut len,
            )
        };
        (rc == 0).then_some(value)
    }
}

#[cfg(not(unix))]
mod sockopt {
    use std::net::UdpSocket;

    pub type Opt = Option<(i32, i32)>;

    pub const SEND_BUFFER: Opt = None;
    pub const RECV_BUFFER: Opt = None;
    pub const TOS_V4: Opt = None;
    pub const TCLASS_V6: Opt = None;
    pub const UNICAST_HOPS_V6: Opt = None;
    pub const MULTICAST_HOPS_V6: Opt = None;

    pub fn set_int(_socket: &UdpSocket, _opt: Opt, _value: i32) -> std::io::Result<()> {
        Err(std::io::Error::from(std::io::ErrorKind::Unsupported))
    }

    pub fn get_int(_socket: &UdpSocket, _opt: Opt) -> Option<i32> {
        None
    }
}

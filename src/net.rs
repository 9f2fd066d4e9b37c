//! Host networking helpers: free ports and the host's routable address

use std::net::{IpAddr, Ipv4Addr, TcpListener};

use crate::{Error, Result};

/// Ask the OS for an unused TCP port.
///
/// The listener is closed before returning, so another process may grab the
/// port before the caller binds it. Call this once per service, right before
/// the port is used; never cache the result.
pub fn free_port() -> Result<u16> {
    let listener = TcpListener::bind(("0.0.0.0", 0))
        .map_err(|e| Error::io("binding ephemeral port", e))?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::io("reading ephemeral port", e))?
        .port();
    drop(listener);

    if port == 0 {
        return Err(Error::provisioning("port allocation", "OS returned port 0"));
    }
    Ok(port)
}

/// Pick the first non-loopback IPv4 address from `addrs`
pub fn first_routable_ipv4<I>(addrs: I) -> Option<Ipv4Addr>
where
    I: IntoIterator<Item = IpAddr>,
{
    addrs.into_iter().find_map(|addr| match addr {
        IpAddr::V4(v4) if !v4.is_loopback() && !v4.is_unspecified() => Some(v4),
        _ => None,
    })
}

/// Addresses of every interface on this host, in the order the OS lists them
pub fn interface_addresses() -> Result<Vec<IpAddr>> {
    let interfaces =
        if_addrs::get_if_addrs().map_err(|e| Error::io("listing network interfaces", e))?;
    Ok(interfaces.iter().map(|iface| iface.ip()).collect())
}

/// Resolve an IPv4 address of this host that containers in the cluster can reach.
///
/// Returns the first non-loopback IPv4 address across the host's interfaces.
/// Works without a default route, e.g. on an offline CI runner where only the
/// docker bridge is up.
pub fn resolve_ip_address() -> Result<Ipv4Addr> {
    first_routable_ipv4(interface_addresses()?)
        .ok_or_else(|| Error::config("unable to resolve a non-loopback IPv4 address"))
}

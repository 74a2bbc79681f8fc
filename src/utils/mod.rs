/// Address parsing helpers shared by the catalog-row parser and the
/// destination resolver.

/// Split `addr` into host and optional port. Accepted forms are `host`,
/// `host:port`, `[v6addr]` and `[v6addr]:port`. The port is returned as
/// written; callers apply their own default when it is absent.
pub fn split_host_port(addr: &str) -> Result<(String, Option<u16>), String> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Err("empty address".to_string());
    }

    if let Some(rest) = addr.strip_prefix('[') {
        let end = rest
            .find(']')
            .ok_or_else(|| format!("unterminated '[' in address '{addr}'"))?;
        let host = &rest[..end];
        if host.is_empty() {
            return Err("empty address".to_string());
        }
        let tail = &rest[end + 1..];
        if tail.is_empty() {
            return Ok((host.to_string(), None));
        }
        let port = tail
            .strip_prefix(':')
            .ok_or_else(|| format!("unexpected characters after ']' in address '{addr}'"))?;
        return Ok((host.to_string(), Some(parse_port(port, addr)?)));
    }

    match addr.split_once(':') {
        None => Ok((addr.to_string(), None)),
        Some((host, port)) => {
            if host.is_empty() {
                return Err("empty address".to_string());
            }
            if port.contains(':') {
                // bare IPv6 without brackets is ambiguous
                return Err(format!("invalid address '{addr}'"));
            }
            Ok((host.to_string(), Some(parse_port(port, addr)?)))
        }
    }
}

fn parse_port(port: &str, addr: &str) -> Result<u16, String> {
    port.parse::<u16>()
        .map_err(|_| format!("invalid port in address '{addr}'"))
}

use crate::Error;
use std::{
    fmt,
    net::{SocketAddr, ToSocketAddrs},
    path::PathBuf,
    str::FromStr,
};

/// Address of a listening or dialable socket.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Endpoint {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl Endpoint {
    /// Resolve `address` into every endpoint it names.
    ///
    /// `address` is either an absolute path (a UNIX-domain socket), `host:port`, or
    /// `[ipv6]:port`. Host names go through the system resolver, so this may block.
    pub fn resolve(address: &str) -> Result<Vec<Self>, Error> {
        if address.starts_with('/') {
            return Ok(vec![Self::Unix(PathBuf::from(address))]);
        }
        let (host, port) = split_host_port(address)?;
        let endpoints: Vec<Self> = (host, port)
            .to_socket_addrs()
            .map_err(|err| Error::ResolveFailed(address.to_string(), err))?
            .map(Self::Tcp)
            .collect();
        if endpoints.is_empty() {
            return Err(Error::NoAddresses(address.to_string()));
        }
        Ok(endpoints)
    }
}

/// Split `host:port` or `[host]:port`.
fn split_host_port(address: &str) -> Result<(&str, u16), Error> {
    let invalid = || Error::InvalidAddress(address.to_string());
    let (host, port) = match address.strip_prefix('[') {
        Some(rest) => {
            let (host, rest) = rest.split_once(']').ok_or_else(invalid)?;
            (host, rest.strip_prefix(':').ok_or_else(invalid)?)
        }
        None => {
            let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
            if host.contains(':') {
                return Err(invalid());
            }
            (host, port)
        }
    };
    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse().map_err(|_| invalid())?;
    Ok((host, port))
}

/// Parses a literal endpoint without consulting the resolver.
impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with('/') {
            return Ok(Self::Unix(PathBuf::from(s)));
        }
        s.parse()
            .map(Self::Tcp)
            .map_err(|_| Error::InvalidAddress(s.to_string()))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "{addr}"),
            Self::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use test_case::test_case;

    #[test]
    fn test_resolve_ipv4() {
        let endpoints = Endpoint::resolve("127.0.0.1:8025").unwrap();
        assert_eq!(
            endpoints,
            vec![Endpoint::Tcp(SocketAddr::from((Ipv4Addr::LOCALHOST, 8025)))]
        );
    }

    #[test]
    fn test_resolve_ipv6() {
        let endpoints = Endpoint::resolve("[::1]:8025").unwrap();
        assert_eq!(
            endpoints,
            vec![Endpoint::Tcp(SocketAddr::from((Ipv6Addr::LOCALHOST, 8025)))]
        );
    }

    #[test]
    fn test_resolve_unix() {
        let endpoints = Endpoint::resolve("/var/run/pipe.sock").unwrap();
        assert_eq!(endpoints, vec![Endpoint::Unix("/var/run/pipe.sock".into())]);
    }

    #[test]
    fn test_resolve_localhost() {
        let endpoints = Endpoint::resolve("localhost:80").unwrap();
        assert!(endpoints.iter().all(|endpoint| matches!(
            endpoint,
            Endpoint::Tcp(addr) if addr.ip().is_loopback() && addr.port() == 80
        )));
    }

    #[test_case("localhost"; "missing port")]
    #[test_case("[::1]"; "bracketed missing port")]
    #[test_case("[::1]8025"; "bracketed missing colon")]
    #[test_case("[::1:8025"; "unterminated bracket")]
    #[test_case("::1:8025"; "unbracketed ipv6")]
    #[test_case(":8025"; "empty host")]
    #[test_case("localhost:http"; "named port")]
    #[test_case("localhost:70000"; "port out of range")]
    fn test_resolve_invalid(address: &str) {
        assert!(matches!(
            Endpoint::resolve(address),
            Err(Error::InvalidAddress(invalid)) if invalid == address
        ));
    }

    #[test]
    fn test_parse_literal() {
        let tcp: Endpoint = "10.0.0.1:443".parse().unwrap();
        assert_eq!(tcp.to_string(), "10.0.0.1:443");
        let v6: Endpoint = "[::1]:443".parse().unwrap();
        assert_eq!(v6.to_string(), "[::1]:443");
        let unix: Endpoint = "/tmp/s".parse().unwrap();
        assert_eq!(unix.to_string(), "/tmp/s");
        assert!("example.com:443".parse::<Endpoint>().is_err());
    }
}

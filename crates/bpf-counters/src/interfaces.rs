//! Host interface enumeration.
//!
//! Dump-all needs the current interface set. It is injected through
//! [`InterfaceSource`] so tests can substitute a fixed list.

use crate::error::CounterResult;

/// Supplies the names of the interfaces to report on.
pub trait InterfaceSource: Send + Sync {
    fn interfaces(&self) -> CounterResult<Vec<String>>;
}

impl<F> InterfaceSource for F
where
    F: Fn() -> CounterResult<Vec<String>> + Send + Sync,
{
    fn interfaces(&self) -> CounterResult<Vec<String>> {
        self()
    }
}

/// A fixed interface list.
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaces(pub Vec<String>);

impl StaticInterfaces {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }
}

impl InterfaceSource for StaticInterfaces {
    fn interfaces(&self) -> CounterResult<Vec<String>> {
        Ok(self.0.clone())
    }
}

/// Interfaces currently present on the host, from `if_nameindex(3)`.
#[cfg(target_os = "linux")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaces;

#[cfg(target_os = "linux")]
impl InterfaceSource for SystemInterfaces {
    fn interfaces(&self) -> CounterResult<Vec<String>> {
        let list = nix::net::if_::if_nameindex()
            .map_err(|e| crate::error::CounterError::enumeration("host interfaces", e))?;
        Ok(list
            .iter()
            .map(|iface| iface.name().to_string_lossy().into_owned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CounterError;

    #[test]
    fn test_static_interfaces() {
        let source = StaticInterfaces::new(["eth0", "lo"]);
        assert_eq!(source.interfaces().unwrap(), vec!["eth0", "lo"]);
    }

    #[test]
    fn test_closure_source_propagates_errors() {
        let source = || -> CounterResult<Vec<String>> {
            Err(CounterError::enumeration("host interfaces", "netlink down"))
        };
        assert!(matches!(
            source.interfaces(),
            Err(CounterError::Enumeration { .. })
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_system_interfaces_includes_loopback() {
        let names = SystemInterfaces.interfaces().unwrap();
        assert!(names.iter().any(|n| n == "lo"));
    }
}

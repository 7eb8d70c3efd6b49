//! Error handling for NUMA placement and affinity operations.

use std::io;
use std::result;

use thiserror::Error;

use crate::topology::NodeId;

/// A specialized `Result` type for NUMA operations.
pub type Result<T> = result::Result<T, Error>;

/// Errors that can occur during NUMA placement and affinity operations.
///
/// Every failing system call is converted into one of these kinds and
/// returned immediately. Nothing is retried.
#[derive(Debug, Error)]
pub enum Error {
    /// The NUMA memory-policy interface is not usable on this host.
    #[error("NUMA is not available on this system")]
    NumaUnavailable,

    /// The node ID does not name a node present on this system.
    #[error("NUMA node {0} does not exist")]
    InvalidNode(NodeId),

    /// The OS could not provide the requested memory.
    #[error("failed to allocate {size} bytes")]
    OutOfMemory {
        /// Requested size in bytes.
        size: usize,
        /// Error reported by the OS.
        #[source]
        source: io::Error,
    },

    /// Changing the thread's CPU placement failed.
    #[error("scheduling request failed: {0}")]
    SchedulingFailed(#[source] io::Error),

    /// Reading the thread's CPU affinity failed.
    #[error("affinity query failed: {0}")]
    AffinityQueryFailed(#[source] io::Error),

    /// The OS rejected the requested affinity mask.
    #[error("invalid affinity mask: {0}")]
    InvalidAffinityMask(#[source] io::Error),

    /// Any other system call or sysfs read failed.
    #[error("system call failed: {0}")]
    SystemCallFailed(#[source] io::Error),

    /// The caller's mask buffer cannot hold the requested CPU count.
    #[error("CPU mask holds {actual} words, {required} required")]
    MaskTooSmall {
        /// Words needed for the CPU count.
        required: usize,
        /// Words present in the mask.
        actual: usize,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// The originating OS error code, if this error carries one.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            Error::OutOfMemory { source, .. } => source.raw_os_error(),
            Error::SchedulingFailed(err)
            | Error::AffinityQueryFailed(err)
            | Error::InvalidAffinityMask(err)
            | Error::SystemCallFailed(err) => err.raw_os_error(),
            _ => None,
        }
    }

    /// Convert a failed OS call, reporting a missing or blocked interface as
    /// [`Error::NumaUnavailable`] and anything else as `kind`.
    pub(crate) fn from_os(err: io::Error, kind: fn(io::Error) -> Error) -> Error {
        if err.kind() == io::ErrorKind::Unsupported {
            Error::NumaUnavailable
        } else {
            kind(err)
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::SystemCallFailed(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_code_is_carried_through() {
        let err = Error::InvalidAffinityMask(io::Error::from_raw_os_error(libc::EINVAL));
        assert_eq!(err.os_code(), Some(libc::EINVAL));
        assert_eq!(Error::InvalidNode(3).os_code(), None);
    }

    #[test]
    fn io_errors_become_system_call_failures() {
        let err: Error = io::Error::from_raw_os_error(libc::ENOENT).into();
        assert!(matches!(err, Error::SystemCallFailed(_)));
        assert_eq!(err.os_code(), Some(libc::ENOENT));
    }

    #[test]
    fn unsupported_interfaces_mean_numa_is_unavailable() {
        let blocked = io::Error::new(io::ErrorKind::Unsupported, "blocked");
        assert!(matches!(Error::from_os(blocked, Error::SchedulingFailed), Error::NumaUnavailable));

        let rejected = io::Error::from_raw_os_error(libc::EINVAL);
        assert!(matches!(Error::from_os(rejected, Error::SchedulingFailed), Error::SchedulingFailed(_)));
    }

    #[test]
    fn display_names_the_node() {
        assert_eq!(Error::InvalidNode(7).to_string(), "NUMA node 7 does not exist");
    }
}

//! Page alignment helpers.

use std::sync::OnceLock;

/// Round up to the next multiple of `align`.
///
/// `align` must be a power of two. Returns `None` on overflow.
#[inline]
pub fn align_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
    value.checked_add(align - 1).map(|v| v & !(align - 1))
}

/// Round down to the previous multiple of `align`.
///
/// `align` must be a power of two.
#[inline]
pub fn align_down(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
    value & !(align - 1)
}

/// Check if a value is aligned to a given alignment.
#[inline]
pub fn is_aligned(value: usize, align: usize) -> bool {
    debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
    (value & (align - 1)) == 0
}

/// The whole pages covering `addr..addr + len`, as `(start, len)`.
///
/// Returns `None` if the span wraps the address space.
pub fn page_span(addr: usize, len: usize, page: usize) -> Option<(usize, usize)> {
    let start = align_down(addr, page);
    let end = align_up(addr.checked_add(len)?, page)?;
    Some((start, end - start))
}

/// Get the system page size.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(query_page_size)
}

fn query_page_size() -> usize {
    #[cfg(unix)]
    {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            size as usize
        } else {
            4096
        }
    }

    #[cfg(windows)]
    {
        use winapi::um::sysinfoapi::{GetSystemInfo, SYSTEM_INFO};

        unsafe {
            let mut system_info: SYSTEM_INFO = std::mem::zeroed();
            GetSystemInfo(&mut system_info);
            system_info.dwPageSize as usize
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        4096
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(align_up(0, 4096), Some(0));
        assert_eq!(align_up(1, 4096), Some(4096));
        assert_eq!(align_up(4096, 4096), Some(4096));
        assert_eq!(align_up(usize::MAX, 4096), None);
        assert_eq!(align_down(8191, 4096), 4096);
        assert!(is_aligned(8192, 4096));
        assert!(!is_aligned(8193, 4096));
    }

    #[test]
    fn page_span_covers_partial_pages() {
        assert_eq!(page_span(4100, 10, 4096), Some((4096, 4096)));
        assert_eq!(page_span(4090, 10, 4096), Some((0, 8192)));
        assert_eq!(page_span(8192, 4096, 4096), Some((8192, 4096)));
        assert_eq!(page_span(usize::MAX - 1, 10, 4096), None);
    }

    #[test]
    fn page_size_is_a_power_of_two() {
        assert!(page_size().is_power_of_two());
    }
}

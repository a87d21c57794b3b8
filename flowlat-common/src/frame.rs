//! Bounds-checked access to one link-layer frame.

/// A read ran past the end of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("frame truncated: {needed} bytes at offset {offset} exceed frame length")]
pub struct Truncated {
    pub offset: usize,
    pub needed: usize,
}

/// An immutable frame whose end is fixed for the duration of one
/// classification call.
///
/// Every structured read goes through [`Frame::load`], which checks the
/// requested range against [`Frame::len`] before touching memory. The kernel
/// adapter performs that comparison on packet pointers right before the read
/// so the verifier can follow it.
pub trait Frame {
    /// Number of readable bytes.
    fn len(&self) -> usize;

    /// Copy `N` bytes starting at `offset`.
    fn load<const N: usize>(&self, offset: usize) -> Result<[u8; N], Truncated>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check that `size` bytes starting at `offset` are readable.
    #[inline(always)]
    fn ensure(&self, offset: usize, size: usize) -> Result<(), Truncated> {
        match offset.checked_add(size) {
            Some(end) if end <= self.len() => Ok(()),
            _ => Err(Truncated {
                offset,
                needed: size,
            }),
        }
    }
}

impl Frame for [u8] {
    #[inline(always)]
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    #[inline(always)]
    fn load<const N: usize>(&self, offset: usize) -> Result<[u8; N], Truncated> {
        self.ensure(offset, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self[offset..offset + N]);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_within_bounds() {
        let buf = [1u8, 2, 3, 4, 5];
        let frame: &[u8] = &buf;
        assert_eq!(frame.load::<2>(3), Ok([4, 5]));
        assert_eq!(frame.load::<5>(0), Ok(buf));
    }

    #[test]
    fn test_load_past_end_is_truncated() {
        let buf = [0u8; 4];
        let frame: &[u8] = &buf;
        assert_eq!(
            frame.load::<2>(3),
            Err(Truncated {
                offset: 3,
                needed: 2
            })
        );
    }

    #[test]
    fn test_ensure_handles_overflow() {
        let frame: &[u8] = &[0u8; 8];
        assert!(frame.ensure(usize::MAX, 2).is_err());
        assert!(frame.ensure(8, 0).is_ok());
        assert!(frame.ensure(8, 1).is_err());
    }
}

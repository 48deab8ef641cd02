//! Fields whose value is only known once a container is fully laid out
//!
//! Writers reserve the bytes of such a field, register how to compute it from the final layout
//! `L`, and resolve every registered field in one pass at the end.

use tracing::trace;

use crate::error::{Error, Result};

type Resolver<L> = Box<dyn Fn(&L) -> Result<u32>>;

/// Little endian `u32` fields written once the layout is known
pub(crate) struct DeferredWrites<L> {
    pending: Vec<(usize, Resolver<L>)>,
}

impl<L> DeferredWrites<L> {
    pub(crate) fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Fill the four bytes at `offset` with `resolve(layout)`
    pub(crate) fn defer(&mut self, offset: usize, resolve: impl Fn(&L) -> Result<u32> + 'static) {
        self.pending.push((offset, Box::new(resolve)));
    }

    /// Number of fields waiting for the layout
    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    /// Write every field into `out`
    pub(crate) fn apply(self, out: &mut [u8], layout: &L) -> Result<()> {
        for (offset, resolve) in self.pending {
            let value = resolve(layout)?;
            let field = out.get_mut(offset..offset + 4).ok_or_else(|| {
                Error::encoding(
                    format!("field at {offset:#x}"),
                    "deferred field lies outside the container",
                )
            })?;
            field.copy_from_slice(&value.to_le_bytes());
            trace!(offset, value, "patched field");
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::error::{ErrorKind, Result};
    use crate::patch::DeferredWrites;

    struct Layout {
        base: u32,
    }

    #[test]
    fn fields_are_resolved_against_the_layout() -> Result<()> {
        let mut writes = DeferredWrites::new();
        for (slot, relative) in [(0usize, 0u32), (4, 0x200)] {
            writes.defer(slot, move |layout: &Layout| Ok(layout.base + relative));
        }
        assert_eq!(writes.len(), 2);

        let mut out = vec![0xFF; 8];
        writes.apply(&mut out, &Layout { base: 0x1000 })?;
        assert_eq!(out, vec![0x00, 0x10, 0x00, 0x00, 0x00, 0x12, 0x00, 0x00]);

        Ok(())
    }

    #[test]
    fn field_outside_the_buffer_is_rejected() {
        let mut writes = DeferredWrites::new();
        writes.defer(6, |layout: &Layout| Ok(layout.base));

        let error = writes.apply(&mut [0; 8], &Layout { base: 1 }).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::EncodingConstraintViolation);
    }
}

//! Live instruction rewriting in the host image.

pub mod scroll;

#[cfg(windows)]
mod process;

#[cfg(windows)]
pub use process::ProcessCode;

use tracing::debug;

use crate::error::{EngineError, Result};

/// x86 one byte no-op.
pub const NOP: u8 = 0x90;

/// Writes into executable pages.
///
/// Implementations must leave the original page protection in place on every
/// exit path, including failed writes.
pub trait CodeWriter {
    fn write(&mut self, address: usize, bytes: &[u8]) -> Result<()>;
}

/// How an instruction encodes its memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandEncoding {
    /// 32 bit absolute address.
    Absolute32,

    /// 32 bit displacement from the address of the following instruction.
    RipRelative { next_instruction: usize },
}

/// Neutralize `len` bytes of code at `address`.
#[tracing::instrument(skip(writer))]
pub fn nop_fill(writer: &mut impl CodeWriter, address: usize, len: usize) -> Result<()> {
    writer.write(address, &vec![NOP; len])?;
    debug!("{len} byte(s) at {address:#x} replaced with nop");

    Ok(())
}

/// Point the memory operand stored at `operand` to `value`.
///
/// The instruction keeps executing but reads from `value` instead.
#[tracing::instrument(skip(writer))]
pub fn redirect_operand(
    writer: &mut impl CodeWriter,
    operand: usize,
    value: usize,
    encoding: OperandEncoding,
) -> Result<()> {
    let bytes = encode_operand(operand, value, encoding)?;
    writer.write(operand, &bytes)?;
    debug!("operand at {operand:#x} redirected to {value:#x}");

    Ok(())
}

fn encode_operand(operand: usize, value: usize, encoding: OperandEncoding) -> Result<[u8; 4]> {
    match encoding {
        OperandEncoding::Absolute32 => u32::try_from(value)
            .map(u32::to_le_bytes)
            .map_err(|_| EngineError::Patch {
                address: operand,
                len: 4,
                reason: "value address does not fit in 32 bits",
            }),

        OperandEncoding::RipRelative { next_instruction } => {
            let displacement = (value as i128) - (next_instruction as i128);
            i32::try_from(displacement)
                .map(i32::to_le_bytes)
                .map_err(|_| EngineError::Patch {
                    address: operand,
                    len: 4,
                    reason: "value out of rip relative range",
                })
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// In-memory code buffer addressed from `base`.
    pub struct BufferWriter {
        pub base: usize,
        pub bytes: Vec<u8>,
        pub writes: usize,
        fail_at: Option<usize>,
    }

    impl BufferWriter {
        pub fn new(base: usize, bytes: Vec<u8>) -> Self {
            Self {
                base,
                bytes,
                writes: 0,
                fail_at: None,
            }
        }

        /// Fail the write following `writes` successful ones, once.
        pub fn failing_after(mut self, writes: usize) -> Self {
            self.fail_at = Some(writes);
            self
        }
    }

    impl CodeWriter for BufferWriter {
        fn write(&mut self, address: usize, bytes: &[u8]) -> Result<()> {
            if self.fail_at == Some(self.writes) {
                self.fail_at = None;
                return Err(EngineError::Patch {
                    address,
                    len: bytes.len(),
                    reason: "page protection change failed",
                });
            }

            let out_of_range = EngineError::Patch {
                address,
                len: bytes.len(),
                reason: "outside of buffer",
            };
            let start = address.checked_sub(self.base).ok_or(out_of_range)?;
            let Some(dst) = self.bytes.get_mut(start..start + bytes.len()) else {
                return Err(EngineError::Patch {
                    address,
                    len: bytes.len(),
                    reason: "outside of buffer",
                });
            };

            dst.copy_from_slice(bytes);
            self.writes += 1;
            Ok(())
        }
    }

    #[test]
    fn nop_fill_only_touches_range() {
        let mut writer = BufferWriter::new(0x1000, vec![0xCC; 16]);
        nop_fill(&mut writer, 0x1004, 8).unwrap();
        assert_eq!(&writer.bytes[..4], &[0xCC; 4]);
        assert_eq!(&writer.bytes[4..12], &[NOP; 8]);
        assert_eq!(&writer.bytes[12..], &[0xCC; 4]);
    }

    #[test]
    fn absolute_operand_is_little_endian() {
        let mut writer = BufferWriter::new(0, vec![0xDC, 0x0D, 0, 0, 0, 0]);
        redirect_operand(&mut writer, 2, 0x1234_5678, OperandEncoding::Absolute32).unwrap();
        assert_eq!(writer.bytes, [0xDC, 0x0D, 0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn absolute_operand_rejects_high_address() {
        let mut writer = BufferWriter::new(0, vec![0; 8]);
        let res = redirect_operand(
            &mut writer,
            2,
            0x1_0000_0000,
            OperandEncoding::Absolute32,
        );
        assert!(matches!(res, Err(EngineError::Patch { .. })));
        assert_eq!(writer.writes, 0);
    }

    #[test]
    fn rip_relative_operand() {
        let mut writer = BufferWriter::new(0x1000, vec![0; 8]);
        redirect_operand(
            &mut writer,
            0x1004,
            0x1000,
            OperandEncoding::RipRelative {
                next_instruction: 0x1008,
            },
        )
        .unwrap();
        assert_eq!(&writer.bytes[4..], &(-8i32).to_le_bytes());

        let res = redirect_operand(
            &mut writer,
            0x1004,
            0x1008 + 0x8000_0000,
            OperandEncoding::RipRelative {
                next_instruction: 0x1008,
            },
        );
        assert!(matches!(res, Err(EngineError::Patch { .. })));
    }

    #[test]
    fn write_outside_buffer_fails() {
        let mut writer = BufferWriter::new(0x1000, vec![0; 4]);
        assert!(nop_fill(&mut writer, 0x1002, 4).is_err());
        assert!(nop_fill(&mut writer, 0x10, 1).is_err());
        assert_eq!(writer.bytes, [0; 4]);
    }
}

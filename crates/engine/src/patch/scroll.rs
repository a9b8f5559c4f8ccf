//! Fader wheel step patches.
//!
//! The host multiplies every wheel step by a hardcoded factor. On x86_64 the
//! two `mulss` instructions doing so are removed and the handler is hooked to
//! apply the configured step instead. On x86 the `fmul` operands are pointed
//! at a cell holding the configured step.

use core::sync::atomic::{AtomicU64, Ordering};

use iced_x86::{Decoder, DecoderOptions, Mnemonic, OpKind};
use tracing::{debug, error};

use super::{CodeWriter, OperandEncoding, nop_fill, redirect_operand};
use crate::{
    error::{EngineError, Result},
    scan::{ImageRegion, Signature},
    theme::flavor::Flavor,
};

/// Bytes of the handler searched for `mulss` sites.
pub const HANDLER_SCAN_LEN: usize = 500;

/// Number of multiply sites every supported build has.
pub const EXPECTED_SITES: usize = 2;

/// Offset of the memory operand inside `fmul qword [abs32]`.
const FMUL_OPERAND_OFFSET: usize = 2;

fn handler_signature() -> Result<Signature> {
    Ok(Signature::parse(
        "scroll handler",
        "48 89 74 24 20 41 54 48 83 EC ?? 83 B9",
    )?)
}

fn fmul_signatures(flavor: Flavor) -> Result<[Signature; 2]> {
    let first = Signature::parse("scroll fmul", "DC 0D ?? ?? ?? ?? 8D ?? ?? ?? DE E9")?;
    let second = match flavor {
        Flavor::Default => Signature::parse("scroll fmul shift", "DC 0D ?? ?? ?? ?? DE E9 D9")?,
        Flavor::Banana | Flavor::Potato => Signature::parse(
            "scroll fmul shift",
            "DC 0D ?? ?? ?? ?? 8D ?? ?? ?? ?? ?? ?? DE E9",
        )?,
    };

    Ok([first, second])
}

/// Memory operand `mulss` decoded from code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MulssSite {
    pub offset: usize,
    pub len: usize,
}

/// Decode `code` as x86_64 and collect every `mulss` reading memory.
///
/// Decoding follows instruction boundaries from the first byte, so operand
/// bytes of other instructions never produce a site.
pub fn find_mulss(code: &[u8]) -> Vec<MulssSite> {
    let mut decoder = Decoder::with_ip(64, code, 0, DecoderOptions::NONE);

    let mut sites = Vec::new();
    for instr in &mut decoder {
        if instr.is_invalid() {
            continue;
        }

        if instr.mnemonic() == Mnemonic::Mulss && instr.op1_kind() == OpKind::Memory {
            sites.push(MulssSite {
                offset: instr.ip() as usize,
                len: instr.len(),
            });
        }
    }

    sites
}

/// Verified x86_64 handler patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerPatch {
    handler: usize,
    sites: [MulssSite; EXPECTED_SITES],
    original: [Vec<u8>; EXPECTED_SITES],
}

impl HandlerPatch {
    #[tracing::instrument]
    pub fn locate(image: &ImageRegion) -> Result<Self> {
        let sig = handler_signature()?;
        let offset = image
            .find(&sig)
            .ok_or(EngineError::ScanNotFound(sig.name()))?;

        let code = image
            .slice(offset, HANDLER_SCAN_LEN)
            .ok_or(EngineError::ScanNotFound(sig.name()))?;
        let found = find_mulss(code.bytes());
        let sites: [MulssSite; EXPECTED_SITES] =
            found
                .as_slice()
                .try_into()
                .map_err(|_| EngineError::AmbiguousMatch {
                    site: "scroll mulss",
                    expected: EXPECTED_SITES,
                    found: found.len(),
                })?;
        let original =
            sites.map(|site| code.bytes()[site.offset..site.offset + site.len].to_vec());

        let handler = code.base();
        debug!("scroll handler at {handler:#x}, sites: {sites:?}");
        Ok(Self {
            handler,
            sites,
            original,
        })
    }

    #[inline]
    pub const fn handler(&self) -> usize {
        self.handler
    }

    /// Absolute addresses and lengths of the patched instructions.
    pub fn sites(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.sites
            .iter()
            .map(|site| (self.handler + site.offset, site.len))
    }

    /// Remove both multiplies.
    ///
    /// If a site cannot be written, sites already written are restored.
    pub fn apply(&self, writer: &mut impl CodeWriter) -> Result<()> {
        for (index, (address, len)) in self.sites().enumerate() {
            if let Err(err) = nop_fill(writer, address, len) {
                if let Err(restore) = self.restore(writer, index) {
                    error!("scroll handler left partially patched. err: {restore}");
                }

                return Err(err);
            }
        }

        Ok(())
    }

    /// Put the original multiplies back.
    pub fn revert(&self, writer: &mut impl CodeWriter) -> Result<()> {
        self.restore(writer, EXPECTED_SITES)
    }

    fn restore(&self, writer: &mut impl CodeWriter, count: usize) -> Result<()> {
        let mut res = Ok(());
        for ((address, _), original) in self.sites().zip(&self.original).take(count) {
            if let Err(err) = writer.write(address, original) {
                error!("cannot restore multiply at {address:#x}. err: {err}");
                res = res.and(Err(err));
            }
        }

        res
    }
}

/// Verified x86 operand patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperandPatch {
    operands: [usize; EXPECTED_SITES],
    original: [[u8; 4]; EXPECTED_SITES],
}

impl OperandPatch {
    #[tracing::instrument]
    pub fn locate(image: &ImageRegion, flavor: Flavor) -> Result<Self> {
        let mut operands = [0; EXPECTED_SITES];
        let mut original = [[0; 4]; EXPECTED_SITES];
        for ((sig, operand), saved) in fmul_signatures(flavor)?
            .iter()
            .zip(&mut operands)
            .zip(&mut original)
        {
            let mut matches = image.find_all(sig);
            let (Some(offset), None) = (matches.next(), matches.next()) else {
                let found = image.find_all(sig).count();
                if found == 0 {
                    return Err(EngineError::ScanNotFound(sig.name()));
                }

                return Err(EngineError::AmbiguousMatch {
                    site: sig.name(),
                    expected: 1,
                    found,
                });
            };

            let operand_offset = offset + FMUL_OPERAND_OFFSET;
            saved.copy_from_slice(&image.bytes()[operand_offset..operand_offset + 4]);
            *operand = image.base() + operand_offset;
        }

        debug!("scroll fmul operands at {operands:x?}");
        Ok(Self { operands, original })
    }

    #[inline]
    pub const fn operands(&self) -> &[usize; EXPECTED_SITES] {
        &self.operands
    }

    /// Point both operands at `value`, usually [`StepCell::address`].
    ///
    /// If the second operand cannot be written, the first is restored.
    pub fn apply(&self, writer: &mut impl CodeWriter, value: usize) -> Result<()> {
        for (index, &operand) in self.operands.iter().enumerate() {
            if let Err(err) =
                redirect_operand(writer, operand, value, OperandEncoding::Absolute32)
            {
                if let Err(restore) = self.restore(writer, index) {
                    error!("scroll fmul left partially patched. err: {restore}");
                }

                return Err(err);
            }
        }

        Ok(())
    }

    /// Put the original operands back.
    pub fn revert(&self, writer: &mut impl CodeWriter) -> Result<()> {
        self.restore(writer, EXPECTED_SITES)
    }

    fn restore(&self, writer: &mut impl CodeWriter, count: usize) -> Result<()> {
        let mut res = Ok(());
        for (&operand, original) in self.operands.iter().zip(&self.original).take(count) {
            if let Err(err) = writer.write(operand, original) {
                error!("cannot restore operand at {operand:#x}. err: {err}");
                res = res.and(Err(err));
            }
        }

        res
    }
}

/// A `f64` the patched instructions read the step from.
#[derive(Debug)]
#[repr(transparent)]
pub struct StepCell(AtomicU64);

impl StepCell {
    pub const fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    #[inline]
    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub fn address(&self) -> usize {
        self.0.as_ptr() as usize
    }
}

/// Step handed to the original handler once the built in factor is removed.
#[inline]
pub fn scaled_step(step: u32, multiplier: Option<u32>) -> u32 {
    match multiplier {
        Some(multiplier) => step.wrapping_mul(multiplier),
        None => step,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::{NOP, tests::BufferWriter};

    const HANDLER: [u8; 13] = [
        0x48, 0x89, 0x74, 0x24, 0x20, 0x41, 0x54, 0x48, 0x83, 0xEC, 0x30, 0x83, 0xB9,
    ];
    const MULSS: [u8; 8] = [0xF3, 0x0F, 0x59, 0x05, 0x10, 0x20, 0x30, 0x40];
    const MULSS_REX: [u8; 9] = [0xF3, 0x44, 0x0F, 0x59, 0x0D, 0x10, 0x20, 0x30, 0x40];

    /// `mov eax, imm32` whose immediate spells a `mulss [rip+disp32]` prefix.
    const MOV_IMM: [u8; 9] = [0xB8, 0xF3, 0x0F, 0x59, 0x05, 0x10, 0x20, 0x30, 0x40];

    fn image_with(sites: &[&[u8]]) -> Vec<u8> {
        let mut image = vec![0xCC; 64];
        image.extend_from_slice(&HANDLER);
        for site in sites {
            image.extend_from_slice(&[0x90; 20]);
            image.extend_from_slice(site);
        }
        image.resize(image.len() + 600, 0xCC);
        image
    }

    #[test]
    fn mulss_forms() {
        assert_eq!(find_mulss(&MULSS), [MulssSite { offset: 0, len: 8 }]);
        assert_eq!(find_mulss(&MULSS_REX), [MulssSite { offset: 0, len: 9 }]);
        // mulss xmm0, [rax]
        assert_eq!(
            find_mulss(&[0x90, 0xF3, 0x0F, 0x59, 0x00]),
            [MulssSite { offset: 1, len: 4 }]
        );

        // register operand
        assert!(find_mulss(&[0xF3, 0x0F, 0x59, 0xC1]).is_empty());
        // truncated displacement
        assert!(find_mulss(&MULSS[..6]).is_empty());
    }

    #[test]
    fn mulss_inside_immediate_is_not_a_site() {
        assert!(find_mulss(&MOV_IMM).is_empty());

        let image = image_with(&[&MULSS, &MOV_IMM]);
        let region = ImageRegion::new(0, &image);
        match HandlerPatch::locate(&region) {
            Err(EngineError::AmbiguousMatch {
                expected, found, ..
            }) => {
                assert_eq!(expected, 2);
                assert_eq!(found, 1);
            }
            res => panic!("unexpected result: {res:?}"),
        }

        let image = image_with(&[&MULSS, &MOV_IMM, &MULSS_REX]);
        let region = ImageRegion::new(0, &image);
        let patch = HandlerPatch::locate(&region).unwrap();

        let first = 64 + HANDLER.len() + 20;
        let decoy = first + MULSS.len() + 20;
        let second = decoy + MOV_IMM.len() + 20;
        assert_eq!(
            patch.sites().collect::<Vec<_>>(),
            [(first, MULSS.len()), (second, MULSS_REX.len())]
        );

        let mut writer = BufferWriter::new(0, image.clone());
        patch.apply(&mut writer).unwrap();
        assert_eq!(&writer.bytes[decoy..decoy + MOV_IMM.len()], &MOV_IMM);
    }

    #[test]
    fn handler_patch_nops_both_sites() {
        let image = image_with(&[&MULSS, &MULSS_REX]);
        let region = ImageRegion::new(0x14000_0000, &image);

        let patch = HandlerPatch::locate(&region).unwrap();
        assert_eq!(patch.handler(), 0x14000_0000 + 64);

        let mut writer = BufferWriter::new(region.base(), image.clone());
        patch.apply(&mut writer).unwrap();
        assert_eq!(writer.writes, 2);

        let first = 64 + HANDLER.len() + 20;
        assert_eq!(&writer.bytes[first..first + 8], &[NOP; 8]);
        let second = first + 8 + 20;
        assert_eq!(&writer.bytes[second..second + 9], &[NOP; 9]);
        assert_eq!(writer.bytes[second + 9], 0xCC);

        patch.revert(&mut writer).unwrap();
        assert_eq!(writer.bytes, image);
    }

    #[test]
    fn handler_patch_restores_first_site_on_failure() {
        let image = image_with(&[&MULSS, &MULSS_REX]);
        let region = ImageRegion::new(0x14000_0000, &image);
        let patch = HandlerPatch::locate(&region).unwrap();

        let mut writer = BufferWriter::new(region.base(), image.clone()).failing_after(1);
        assert!(matches!(
            patch.apply(&mut writer),
            Err(EngineError::Patch { .. })
        ));
        assert_eq!(writer.bytes, image);

        let mut writer = BufferWriter::new(region.base(), image.clone()).failing_after(0);
        assert!(patch.apply(&mut writer).is_err());
        assert_eq!(writer.bytes, image);
        assert_eq!(writer.writes, 0);
    }

    #[test]
    fn handler_patch_requires_exactly_two_sites() {
        let cases: [&[&[u8]]; 2] = [&[&MULSS], &[&MULSS, &MULSS, &MULSS]];
        for sites in cases {
            let image = image_with(sites);
            let region = ImageRegion::new(0, &image);
            match HandlerPatch::locate(&region) {
                Err(EngineError::AmbiguousMatch {
                    expected, found, ..
                }) => {
                    assert_eq!(expected, 2);
                    assert_eq!(found, sites.len());
                }
                res => panic!("unexpected result: {res:?}"),
            }
        }
    }

    #[test]
    fn handler_patch_ignores_sites_past_window() {
        let mut image = image_with(&[&MULSS, &MULSS]);
        image.extend_from_slice(&MULSS);
        let region = ImageRegion::new(0, &image);
        assert!(HandlerPatch::locate(&region).is_ok());
    }

    #[test]
    fn missing_handler() {
        let image = vec![0xCC; 128];
        let region = ImageRegion::new(0, &image);
        assert!(matches!(
            HandlerPatch::locate(&region),
            Err(EngineError::ScanNotFound("scroll handler"))
        ));
    }

    fn fmul_image() -> Vec<u8> {
        let mut image = vec![0xCC; 32];
        image.extend_from_slice(&[0xDC, 0x0D, 1, 2, 3, 4, 0x8D, 9, 9, 9, 0xDE, 0xE9]);
        image.extend_from_slice(&[0xCC; 16]);
        image.extend_from_slice(&[0xDC, 0x0D, 5, 6, 7, 8, 0xDE, 0xE9, 0xD9]);
        image.extend_from_slice(&[0xCC; 16]);
        image
    }

    #[test]
    fn operand_patch_default_flavor() {
        let image = fmul_image();
        let region = ImageRegion::new(0x40_0000, &image);

        let patch = OperandPatch::locate(&region, Flavor::Default).unwrap();
        assert_eq!(patch.operands(), &[0x40_0000 + 34, 0x40_0000 + 62]);

        let mut writer = BufferWriter::new(region.base(), image.clone());
        patch.apply(&mut writer, 0x0060_1000).unwrap();
        assert_eq!(&writer.bytes[34..38], &0x0060_1000u32.to_le_bytes());
        assert_eq!(&writer.bytes[62..66], &0x0060_1000u32.to_le_bytes());

        patch.revert(&mut writer).unwrap();
        assert_eq!(writer.bytes, image);
    }

    #[test]
    fn operand_patch_restores_first_operand_on_failure() {
        let image = fmul_image();
        let region = ImageRegion::new(0x40_0000, &image);
        let patch = OperandPatch::locate(&region, Flavor::Default).unwrap();

        let mut writer = BufferWriter::new(region.base(), image.clone()).failing_after(1);
        assert!(patch.apply(&mut writer, 0x0060_1000).is_err());
        assert_eq!(writer.bytes, image);

        // high cell address is rejected before anything is written
        let mut writer = BufferWriter::new(region.base(), image.clone());
        assert!(patch.apply(&mut writer, 0x1_0000_0000).is_err());
        assert_eq!(writer.writes, 0);
    }

    #[test]
    fn operand_patch_rejects_duplicates() {
        let site = [0xDC, 0x0D, 1, 2, 3, 4, 0x8D, 9, 9, 9, 0xDE, 0xE9];
        let mut image = Vec::new();
        image.extend_from_slice(&site);
        image.extend_from_slice(&site);
        image.extend_from_slice(&[0xDC, 0x0D, 5, 6, 7, 8, 0xDE, 0xE9, 0xD9]);
        let region = ImageRegion::new(0, &image);

        assert!(matches!(
            OperandPatch::locate(&region, Flavor::Default),
            Err(EngineError::AmbiguousMatch {
                site: "scroll fmul",
                expected: 1,
                found: 2
            })
        ));

        // the Banana shift site is absent here
        assert!(matches!(
            OperandPatch::locate(&region, Flavor::Banana),
            Err(EngineError::AmbiguousMatch { .. } | EngineError::ScanNotFound(_))
        ));
    }

    #[test]
    fn step_cell_and_scaling() {
        let cell = StepCell::new(3.0);
        assert_eq!(cell.get(), 3.0);
        cell.set(0.5);
        assert_eq!(cell.get(), 0.5);

        assert_eq!(scaled_step(120, Some(2)), 240);
        assert_eq!(scaled_step(120, None), 120);
    }
}

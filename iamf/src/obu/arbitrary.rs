use anyhow::Result;

use crate::obu::ObuBase;
use crate::obu::header::{ObuHeader, ObuType};
use crate::utils::bit_buffer::WriteBitBuffer;

/// Where an [`ArbitraryObu`] is placed in the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InsertionHook {
    BeforeDescriptors,
    AfterDescriptors,
    AfterIaSequenceHeader,
    AfterCodecConfigs,
    AfterAudioElements,
    AfterMixPresentations,
    BeforeParameterBlocksAtTick,
    AfterParameterBlocksAtTick,
    AfterAudioFramesAtTick,
}

impl InsertionHook {
    pub fn is_temporal_unit_hook(self) -> bool {
        matches!(
            self,
            InsertionHook::BeforeParameterBlocksAtTick
                | InsertionHook::AfterParameterBlocksAtTick
                | InsertionHook::AfterAudioFramesAtTick
        )
    }
}

/// User supplied OBU written verbatim, for edge cases, malformed streams and
/// features the crate does not model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbitraryObu {
    pub header: ObuHeader,
    pub payload: Vec<u8>,
    pub insertion_hook: InsertionHook,
    pub insertion_tick: Option<i64>,
    pub invalidates_bitstream: bool,
}

impl ArbitraryObu {
    pub fn new(obu_type: ObuType, payload: Vec<u8>, insertion_hook: InsertionHook) -> Self {
        Self {
            header: ObuHeader::new(obu_type),
            payload,
            insertion_hook,
            insertion_tick: None,
            invalidates_bitstream: false,
        }
    }

    pub fn at_tick(mut self, tick: i64) -> Self {
        self.insertion_tick = Some(tick);
        self
    }

    /// Writes every OBU with `hook`, in order.
    pub fn write_obus_with_hook<'a>(
        hook: InsertionHook,
        obus: impl IntoIterator<Item = &'a ArbitraryObu>,
        wb: &mut WriteBitBuffer,
    ) -> Result<()> {
        for obu in obus.into_iter().filter(|obu| obu.insertion_hook == hook) {
            obu.validate_and_write(wb)?;
        }

        Ok(())
    }
}

impl ObuBase for ArbitraryObu {
    fn header(&self) -> &ObuHeader {
        &self.header
    }

    fn validate_and_write_payload(&self, wb: &mut WriteBitBuffer) -> Result<()> {
        wb.write_bytes(&self.payload)
    }
}

#[test]
fn writes_only_matching_hook() -> anyhow::Result<()> {
    let obus = [
        ArbitraryObu::new(ObuType::Reserved(24), vec![1, 2], InsertionHook::BeforeDescriptors),
        ArbitraryObu::new(ObuType::Reserved(25), vec![], InsertionHook::AfterDescriptors),
    ];

    let mut wb = WriteBitBuffer::default();
    ArbitraryObu::write_obus_with_hook(InsertionHook::BeforeDescriptors, &obus, &mut wb)?;
    assert_eq!(wb.take_bytes()?, [24 << 3, 2, 1, 2]);

    Ok(())
}

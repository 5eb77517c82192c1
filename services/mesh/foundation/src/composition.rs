//! Composition Data page 0.

use crate::error::FoundationError;
use crate::opcode::COMPOSITION_DATA_STATUS;
use mesh_model::{Element, FeatureFlags, Model, ModelId, NodeComposition};

const HEADER_SIZE: usize = 10;
const ELEMENT_HEADER_SIZE: usize = 4;

fn malformed(expected: usize, actual: usize) -> FoundationError {
    FoundationError::Malformed {
        opcode: COMPOSITION_DATA_STATUS,
        expected,
        actual,
    }
}

fn u16_at(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

/// Parses Composition Data page 0, all fields little-endian:
///
/// ```text
/// CID(2) PID(2) VID(2) CRPL(2) Features(2)
/// { Loc(2) NumS(1) NumV(1) SIG(2 * NumS) Vendor(4 * NumV) }*
/// ```
pub fn parse_page0(data: &[u8]) -> Result<NodeComposition, FoundationError> {
    if data.len() < HEADER_SIZE {
        return Err(malformed(HEADER_SIZE, data.len()));
    }

    let mut elements = Vec::new();
    let mut offset = HEADER_SIZE;
    while offset < data.len() {
        if data.len() - offset < ELEMENT_HEADER_SIZE {
            return Err(malformed(offset + ELEMENT_HEADER_SIZE, data.len()));
        }
        let location = u16_at(data, offset);
        let sig_count = usize::from(data[offset + 2]);
        let vendor_count = usize::from(data[offset + 3]);
        offset += ELEMENT_HEADER_SIZE;

        let end = offset + sig_count * 2 + vendor_count * 4;
        if end > data.len() {
            return Err(malformed(end, data.len()));
        }

        let mut models = Vec::with_capacity(sig_count + vendor_count);
        for _ in 0..sig_count {
            models.push(Model::new(ModelId::Sig(u16_at(data, offset))));
            offset += 2;
        }
        for _ in 0..vendor_count {
            models.push(Model::new(ModelId::Vendor {
                company_id: u16_at(data, offset),
                model_id: u16_at(data, offset + 2),
            }));
            offset += 4;
        }

        elements.push(Element {
            name: None,
            location,
            models,
        });
    }

    if elements.is_empty() {
        return Err(FoundationError::InvalidMessage(
            "composition data without elements".to_string(),
        ));
    }

    Ok(NodeComposition {
        company_identifier: u16_at(data, 0),
        product_identifier: u16_at(data, 2),
        version_identifier: u16_at(data, 4),
        minimum_replay_protection_list: u16_at(data, 6),
        features: FeatureFlags::from_bits_truncate(u16_at(data, 8)),
        elements,
    })
}

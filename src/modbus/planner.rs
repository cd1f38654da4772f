use std::collections::BTreeMap;

use super::protocol::{AddressSpan, ReadRequest, RegisterRegion, Station, MAX_READ_BITS, MAX_READ_REGISTERS};
use super::transformer::ByteOrder;
use crate::utils::error::ModbusError;

/// Registers per grouped read, one below the protocol ceiling.
pub const DEFAULT_MAX_REGISTERS: u16 = 124;
/// Bits per grouped read before clamping to the protocol ceiling.
pub const DEFAULT_MAX_BITS: u16 = 2048;

/// Merges address spans into the fewest read requests that stay within the
/// per-function limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPlanner {
    max_registers: u16,
    max_bits: u16,
}

impl Default for RequestPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REGISTERS, DEFAULT_MAX_BITS)
    }
}

impl RequestPlanner {
    /// Limits are clamped into `2..=125` registers and `1..=2000` bits so every
    /// planned request is valid on the wire.
    pub fn new(max_registers: u16, max_bits: u16) -> Self {
        Self {
            max_registers: max_registers.clamp(2, MAX_READ_REGISTERS),
            max_bits: max_bits.clamp(1, MAX_READ_BITS),
        }
    }

    pub fn limit_for(&self, region: RegisterRegion) -> u16 {
        if region.is_bit() {
            self.max_bits
        } else {
            self.max_registers
        }
    }

    /// Plans reads for spans of a single region.
    pub fn plan(
        &self,
        station: Station,
        region: RegisterRegion,
        spans: &[AddressSpan],
        byte_order: ByteOrder,
    ) -> Result<Vec<ReadRequest>, ModbusError> {
        let limit = self.limit_for(region) as u32;

        for span in spans {
            if span.region != region {
                return Err(ModbusError::ContractViolation(format!(
                    "span '{}' belongs to {} but was planned as {}",
                    span.identifier, span.region, region
                )));
            }
            if span.end() > 65536 {
                return Err(ModbusError::ContractViolation(format!(
                    "span '{}' at {} runs past address 65535",
                    span.identifier, span.address
                )));
            }
        }

        let mut sorted = spans.to_vec();
        sorted.sort_by_key(|span| (span.address, span.size()));

        let mut requests = Vec::new();
        let mut current: Option<Run> = None;

        for span in sorted {
            let extends = current.as_ref().map_or(false, |run| run.accepts(&span, limit));

            if extends {
                if let Some(run) = current.as_mut() {
                    run.push(span);
                }
            } else if let Some(closed) = current.replace(Run::start(span)) {
                requests.push(closed.into_request(station, region, byte_order));
            }
        }

        if let Some(closed) = current {
            requests.push(closed.into_request(station, region, byte_order));
        }

        Ok(requests)
    }

    /// Plans reads for a whole device, region by region.
    pub fn plan_device(
        &self,
        station: Station,
        spans: &[AddressSpan],
        byte_order: ByteOrder,
    ) -> Result<Vec<ReadRequest>, ModbusError> {
        let mut by_region: BTreeMap<RegisterRegion, Vec<AddressSpan>> = BTreeMap::new();
        for span in spans {
            by_region.entry(span.region).or_default().push(span.clone());
        }

        let mut requests = Vec::new();
        for (region, region_spans) in by_region {
            requests.extend(self.plan(station, region, &region_spans, byte_order)?);
        }
        Ok(requests)
    }
}

struct Run {
    start: u16,
    end: u32,
    spans: Vec<AddressSpan>,
}

impl Run {
    fn start(span: AddressSpan) -> Self {
        Self {
            start: span.address,
            end: span.end(),
            spans: vec![span],
        }
    }

    /// Contiguous or overlapping, and the widened run still fits.
    fn accepts(&self, span: &AddressSpan, limit: u32) -> bool {
        span.address as u32 <= self.end && self.end.max(span.end()) - self.start as u32 <= limit
    }

    fn push(&mut self, span: AddressSpan) {
        self.end = self.end.max(span.end());
        self.spans.push(span);
    }

    fn into_request(self, station: Station, region: RegisterRegion, byte_order: ByteOrder) -> ReadRequest {
        let quantity = (self.end - self.start as u32) as u16;
        ReadRequest::new(station, region, self.start, quantity)
            .with_spans(self.spans)
            .with_byte_order(byte_order)
    }
}

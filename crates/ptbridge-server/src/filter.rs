use std::fmt;

use bytes::Bytes;

use crate::error::{BridgeError, Result};

/// Longest mask or pattern a filter may carry.
pub const MAX_FILTER_BYTES: usize = 12;

/// Per-channel filter identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterId(u32);

impl FilterId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// J2534 filter types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum FilterType {
    Pass = 1,
    Block = 2,
    FlowControl = 3,
}

impl FilterType {
    pub fn from_raw(raw: u32) -> Result<Self> {
        match raw {
            1 => Ok(Self::Pass),
            2 => Ok(Self::Block),
            3 => Ok(Self::FlowControl),
            other => Err(BridgeError::InvalidFilter(format!("unknown filter type {other}"))),
        }
    }
}

/// A mask/pattern rule over the leading bytes of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    id: FilterId,
    kind: FilterType,
    mask: Bytes,
    pattern: Bytes,
    flow_control: Option<Bytes>,
}

impl Filter {
    pub fn id(&self) -> FilterId {
        self.id
    }

    pub fn kind(&self) -> FilterType {
        self.kind
    }

    pub fn mask(&self) -> &[u8] {
        &self.mask
    }

    pub fn pattern(&self) -> &[u8] {
        &self.pattern
    }

    /// Flow-control message sent by the device for ISO15765 segmentation.
    pub fn flow_control(&self) -> Option<&[u8]> {
        self.flow_control.as_deref()
    }

    /// `data` matches when every masked byte equals the pattern byte.
    ///
    /// Messages shorter than the mask never match.
    pub fn matches(&self, data: &[u8]) -> bool {
        data.len() >= self.mask.len()
            && self
                .mask
                .iter()
                .zip(self.pattern.iter())
                .zip(data)
                .all(|((mask, pattern), byte)| byte & mask == *pattern)
    }
}

/// Filters installed on one channel.
///
/// With no admitting filter every message is dropped.
#[derive(Debug)]
pub struct FilterSet {
    filters: Vec<Filter>,
    next_id: u32,
    limit: usize,
}

impl FilterSet {
    pub fn new(limit: usize) -> Self {
        Self {
            filters: Vec::new(),
            next_id: 1,
            limit,
        }
    }

    /// Validate and install a filter.
    ///
    /// `flow_control_allowed` is whether the owning channel's protocol
    /// supports flow-control filters.
    pub fn add(
        &mut self,
        kind: FilterType,
        mask: &[u8],
        pattern: &[u8],
        flow_control: Option<&[u8]>,
        flow_control_allowed: bool,
    ) -> Result<FilterId> {
        if mask.is_empty() || mask.len() > MAX_FILTER_BYTES {
            return Err(BridgeError::InvalidFilter(format!(
                "mask length {} outside 1..={MAX_FILTER_BYTES}",
                mask.len()
            )));
        }
        if mask.len() != pattern.len() {
            return Err(BridgeError::InvalidFilter(format!(
                "mask length {} differs from pattern length {}",
                mask.len(),
                pattern.len()
            )));
        }
        match (kind, flow_control) {
            (FilterType::FlowControl, None) => {
                return Err(BridgeError::InvalidFilter(
                    "flow-control filter needs a flow-control message".to_string(),
                ));
            }
            (FilterType::FlowControl, Some(_)) if !flow_control_allowed => {
                return Err(BridgeError::InvalidFilter(
                    "flow-control filters require an ISO15765 channel".to_string(),
                ));
            }
            (FilterType::FlowControl, Some(msg)) if msg.is_empty() || msg.len() > MAX_FILTER_BYTES => {
                return Err(BridgeError::InvalidFilter(format!(
                    "flow-control message length {} outside 1..={MAX_FILTER_BYTES}",
                    msg.len()
                )));
            }
            (FilterType::Pass | FilterType::Block, Some(_)) => {
                return Err(BridgeError::InvalidFilter(
                    "only flow-control filters take a flow-control message".to_string(),
                ));
            }
            _ => {}
        }
        if self.filters.len() >= self.limit {
            return Err(BridgeError::ResourceExhausted("filters per channel"));
        }

        let id = FilterId(self.next_id);
        self.next_id += 1;
        self.filters.push(Filter {
            id,
            kind,
            mask: Bytes::copy_from_slice(mask),
            pattern: Bytes::copy_from_slice(pattern),
            flow_control: flow_control.map(Bytes::copy_from_slice),
        });
        Ok(id)
    }

    /// Remove a filter; `false` if no filter has this id.
    pub fn remove(&mut self, id: FilterId) -> bool {
        let before = self.filters.len();
        self.filters.retain(|filter| filter.id != id);
        self.filters.len() != before
    }

    /// Whether an inbound message gets through.
    ///
    /// A matching block filter always wins; otherwise a matching pass or
    /// flow-control filter admits the message.
    pub fn admits(&self, data: &[u8]) -> bool {
        let mut admitted = false;
        for filter in self.filters.iter().filter(|filter| filter.matches(data)) {
            match filter.kind {
                FilterType::Block => return false,
                FilterType::Pass | FilterType::FlowControl => admitted = true,
            }
        }
        admitted
    }

    pub fn get(&self, id: FilterId) -> Option<&Filter> {
        self.filters.iter().find(|filter| filter.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Filter> {
        self.filters.iter()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID_MASK: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];
    const ECU_7E8: [u8; 4] = [0x00, 0x00, 0x07, 0xE8];

    fn frame_from(id: [u8; 4]) -> Vec<u8> {
        let mut data = id.to_vec();
        data.extend_from_slice(&[0x02, 0x41, 0x0C]);
        data
    }

    #[test]
    fn empty_set_denies_everything() {
        let set = FilterSet::new(10);
        assert!(!set.admits(&frame_from(ECU_7E8)));
        assert!(set.is_empty());
    }

    #[test]
    fn pass_filter_admits_matching_only() {
        let mut set = FilterSet::new(10);
        set.add(FilterType::Pass, &ID_MASK, &ECU_7E8, None, false).unwrap();

        assert!(set.admits(&frame_from(ECU_7E8)));
        assert!(!set.admits(&frame_from([0x00, 0x00, 0x07, 0xE9])));
    }

    #[test]
    fn block_overrides_pass() {
        let mut set = FilterSet::new(10);
        set.add(FilterType::Pass, &[0x00], &[0x00], None, false).unwrap();
        set.add(FilterType::Block, &ID_MASK, &ECU_7E8, None, false).unwrap();

        assert!(!set.admits(&frame_from(ECU_7E8)));
        assert!(set.admits(&frame_from([0x00, 0x00, 0x07, 0xE9])));
    }

    #[test]
    fn short_message_never_matches() {
        let mut set = FilterSet::new(10);
        set.add(FilterType::Pass, &ID_MASK, &ECU_7E8, None, false).unwrap();
        assert!(!set.admits(&[0x00, 0x00, 0x07]));
    }

    #[test]
    fn partial_mask_compares_masked_bits() {
        let mut set = FilterSet::new(10);
        set.add(FilterType::Pass, &[0x00, 0x00, 0x07, 0xF0], &[0x00, 0x00, 0x07, 0xE0], None, false)
            .unwrap();
        assert!(set.admits(&frame_from(ECU_7E8)));
        assert!(set.admits(&frame_from([0x12, 0x34, 0x07, 0xE0])));
        assert!(!set.admits(&frame_from([0x00, 0x00, 0x07, 0xD8])));
    }

    #[test]
    fn validation_errors() {
        let mut set = FilterSet::new(10);
        let cases: [(FilterType, &[u8], &[u8], Option<&[u8]>, bool); 6] = [
            (FilterType::Pass, &[0xFF], &[0xFF, 0x00], None, false),
            (FilterType::Pass, &[], &[], None, false),
            (FilterType::Pass, &[0xFF; 13], &[0x00; 13], None, false),
            (FilterType::FlowControl, &ID_MASK, &ECU_7E8, None, true),
            (FilterType::FlowControl, &ID_MASK, &ECU_7E8, Some(&[0, 0, 7, 0xE0]), false),
            (FilterType::Block, &ID_MASK, &ECU_7E8, Some(&[0, 0, 7, 0xE0]), true),
        ];
        for (kind, mask, pattern, fc, allowed) in cases {
            let err = set.add(kind, mask, pattern, fc, allowed).unwrap_err();
            assert!(matches!(err, BridgeError::InvalidFilter(_)), "{kind:?}: {err}");
        }
        assert!(set.is_empty());
    }

    #[test]
    fn flow_control_filter_admits_and_keeps_message() {
        let mut set = FilterSet::new(10);
        let id = set
            .add(FilterType::FlowControl, &ID_MASK, &ECU_7E8, Some(&[0, 0, 7, 0xE0]), true)
            .unwrap();
        assert!(set.admits(&frame_from(ECU_7E8)));
        assert_eq!(set.get(id).unwrap().flow_control(), Some(&[0, 0, 7, 0xE0][..]));
    }

    #[test]
    fn ids_are_monotonic_and_not_reused() {
        let mut set = FilterSet::new(10);
        let first = set.add(FilterType::Pass, &[0], &[0], None, false).unwrap();
        assert!(set.remove(first));
        assert!(!set.remove(first));
        let second = set.add(FilterType::Pass, &[0], &[0], None, false).unwrap();
        assert!(second > first);
    }

    #[test]
    fn limit_enforced() {
        let mut set = FilterSet::new(2);
        set.add(FilterType::Pass, &[0], &[0], None, false).unwrap();
        set.add(FilterType::Pass, &[0], &[0], None, false).unwrap();
        let err = set.add(FilterType::Pass, &[0], &[0], None, false).unwrap_err();
        assert!(matches!(err, BridgeError::ResourceExhausted(_)));
    }

    #[test]
    fn unknown_filter_type_rejected() {
        assert_eq!(FilterType::from_raw(2).unwrap(), FilterType::Block);
        assert!(FilterType::from_raw(9).is_err());
    }
}

//! AD structure helpers and ready-made items
//!
//! Payloads are concatenations of `[length][type][data...]` elements where the
//! length octet counts the type octet plus the data.

use std::borrow::Cow;
use std::sync::{Arc, Mutex};

use crate::item::{AdvType, AdvertisingEvent, AdvertisingItem, ItemInfo, ItemParams, ParamsSource};

// ----------------------------------------------------------------------------
// AD Types
// ----------------------------------------------------------------------------

pub const AD_TYPE_FLAGS: u8 = 0x01;
pub const AD_TYPE_COMPLETE_16_BIT_UUIDS: u8 = 0x03;
pub const AD_TYPE_SHORTENED_LOCAL_NAME: u8 = 0x08;
pub const AD_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;
pub const AD_TYPE_TX_POWER_LEVEL: u8 = 0x0A;
pub const AD_TYPE_SERVICE_DATA_16_BIT: u8 = 0x16;
pub const AD_TYPE_APPEARANCE: u8 = 0x19;
pub const AD_TYPE_MANUFACTURER_SPECIFIC: u8 = 0xFF;

/// LE General Discoverable Mode
pub const FLAG_LE_GENERAL_DISCOVERABLE: u8 = 0x02;
/// BR/EDR Not Supported
pub const FLAG_BR_EDR_NOT_SUPPORTED: u8 = 0x04;

/// One AD structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdElement {
    pub ad_type: u8,
    pub data: Vec<u8>,
}

impl AdElement {
    pub fn new(ad_type: u8, data: impl Into<Vec<u8>>) -> Self {
        Self {
            ad_type,
            data: data.into(),
        }
    }

    /// Encoded length including both header octets
    pub fn encoded_len(&self) -> usize {
        self.data.len() + 2
    }

    /// Encoded element; `None` if the data cannot fit a length octet
    pub fn encode(&self) -> Option<Vec<u8>> {
        let len = u8::try_from(self.data.len() + 1).ok()?;
        let mut out = Vec::with_capacity(self.encoded_len());
        out.push(len);
        out.push(self.ad_type);
        out.extend_from_slice(&self.data);
        Some(out)
    }
}

/// Split a payload back into its elements, stopping at the first malformed one
pub fn parse_elements(payload: &[u8]) -> Vec<AdElement> {
    let mut elements = Vec::new();
    let mut rest = payload;
    while let [len, tail @ ..] = rest {
        let len = *len as usize;
        if len == 0 || tail.len() < len {
            break;
        }
        elements.push(AdElement::new(tail[0], &tail[1..len]));
        rest = &tail[len..];
    }
    elements
}

// ----------------------------------------------------------------------------
// Ready-made Items
// ----------------------------------------------------------------------------

/// Shared log of the events an item has been notified of
pub type EventLog = Arc<Mutex<Vec<AdvertisingEvent>>>;

/// The synthetic GAP flags item prepended to connectable advertisements
#[derive(Debug, Clone)]
pub struct GapFlagsItem {
    encoded: [u8; 3],
}

impl GapFlagsItem {
    pub fn new(flags: u8) -> Self {
        Self {
            encoded: [2, AD_TYPE_FLAGS, flags],
        }
    }
}

impl Default for GapFlagsItem {
    fn default() -> Self {
        Self::new(FLAG_LE_GENERAL_DISCOVERABLE | FLAG_BR_EDR_NOT_SUPPORTED)
    }
}

impl AdvertisingItem for GapFlagsItem {
    fn info(&self) -> ItemInfo {
        ItemInfo::advert(AdvType::LEGACY_CONNECTABLE_SCANNABLE, self.encoded.len())
    }

    fn data(&self) -> Option<Cow<'_, [u8]>> {
        Some(Cow::Borrowed(&self.encoded))
    }
}

/// Item with fixed info and mutable content
#[derive(Debug, Clone)]
pub struct StaticItem {
    info: ItemInfo,
    data: Vec<u8>,
    params: ParamsSource,
    events: Option<EventLog>,
}

impl StaticItem {
    pub fn new(info: ItemInfo, data: Vec<u8>) -> Self {
        Self {
            info,
            data,
            params: ParamsSource::Defaults,
            events: None,
        }
    }

    /// Item whose payload is a single AD element, sized accordingly
    pub fn from_element(placement_info: ItemInfo, element: AdElement) -> Option<Self> {
        let data = element.encode()?;
        let info = ItemInfo {
            data_size: data.len(),
            ..placement_info
        };
        Some(Self::new(info, data))
    }

    pub fn with_params(mut self, params: ItemParams) -> Self {
        self.params = ParamsSource::Custom(params);
        self
    }

    pub fn with_event_log(mut self, log: EventLog) -> Self {
        self.events = Some(log);
        self
    }

    /// Replace the content, keeping the declared size in step
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.info.data_size = data.len();
        self.data = data;
    }
}

impl AdvertisingItem for StaticItem {
    fn info(&self) -> ItemInfo {
        self.info
    }

    fn data(&self) -> Option<Cow<'_, [u8]>> {
        if self.data.is_empty() {
            None
        } else {
            Some(Cow::Borrowed(&self.data))
        }
    }

    fn parameters(&self) -> ParamsSource {
        self.params
    }

    fn notify(&mut self, event: &AdvertisingEvent) {
        if let Some(log) = &self.events {
            if let Ok(mut log) = log.lock() {
                log.push(*event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_encoding() {
        let name = AdElement::new(AD_TYPE_COMPLETE_LOCAL_NAME, b"bud".to_vec());
        assert_eq!(name.encode(), Some(vec![4, 0x09, b'b', b'u', b'd']));
        assert_eq!(name.encoded_len(), 5);
    }

    #[test]
    fn test_element_too_long_for_length_octet() {
        let widest = AdElement::new(AD_TYPE_MANUFACTURER_SPECIFIC, vec![0xAB; 254]);
        assert_eq!(widest.encode().map(|data| data[0]), Some(255));

        let overlong = AdElement::new(AD_TYPE_MANUFACTURER_SPECIFIC, vec![0xAB; 255]);
        assert_eq!(overlong.encode(), None);
        assert!(StaticItem::from_element(ItemInfo::advert(AdvType::EXTENDED_CONNECTABLE, 0), overlong).is_none());
    }

    #[test]
    fn test_parse_elements_stops_at_truncation() {
        let mut payload = GapFlagsItem::default().encoded.to_vec();
        payload.extend(AdElement::new(AD_TYPE_TX_POWER_LEVEL, vec![0xF4]).encode().unwrap());
        payload.extend([5, 0xFF, 1]);

        let elements = parse_elements(&payload);
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0], AdElement::new(AD_TYPE_FLAGS, vec![0x06]));
        assert_eq!(elements[1].ad_type, AD_TYPE_TX_POWER_LEVEL);
    }

    #[test]
    fn test_static_item_tracks_size() {
        let mut item = StaticItem::from_element(
            ItemInfo::advert(AdvType::LEGACY_SCANNABLE, 0),
            AdElement::new(AD_TYPE_MANUFACTURER_SPECIFIC, vec![0x0A, 0x00, 1, 2]),
        )
        .unwrap();
        assert_eq!(item.info().data_size, 6);
        item.set_data(Vec::new());
        assert_eq!(item.info().data_size, 0);
        assert!(item.data().is_none());
    }
}

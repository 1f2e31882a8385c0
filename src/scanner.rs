use std::collections::HashSet;

use crate::ant::{ChannelId, CommonPage};

#[derive(Clone, Debug, PartialEq)]
pub enum ScanEvent {
    /// First broadcast seen from a transmitter matching the filter.
    Found(ChannelId),
    /// Common data page (manufacturer, product, battery) from a known transmitter.
    Update(ChannelId, CommonPage),
}

/// Turns scan-channel broadcasts into discovery and common-data events.
pub struct Scanner {
    filter: ChannelId,
    seen: HashSet<ChannelId>,
}

impl Scanner {
    pub fn new(filter: ChannelId) -> Self {
        Scanner {
            filter,
            seen: HashSet::new(),
        }
    }

    pub fn filter(&self) -> ChannelId {
        self.filter
    }

    pub fn found_count(&self) -> usize {
        self.seen.len()
    }

    pub fn observe(&mut self, id: ChannelId, page: &[u8; 8]) -> Vec<ScanEvent> {
        let mut events = Vec::new();
        if !id.matches(&self.filter) {
            return events;
        }
        if self.seen.insert(id) {
            events.push(ScanEvent::Found(id));
        }
        if let Some(common) = CommonPage::parse(page) {
            events.push(ScanEvent::Update(id, common));
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POWER_PAGE: [u8; 8] = [0x10, 0x01, 0xFF, 0x5A, 0x00, 0x00, 0xC8, 0x00];
    const PRODUCT_PAGE: [u8; 8] = [0x51, 0xFF, 0xFF, 0x02, 0x01, 0x00, 0x00, 0x00];

    fn id(device_number: u16, device_type: u8) -> ChannelId {
        ChannelId {
            device_number,
            device_type,
            transmission_type: 5,
        }
    }

    #[test]
    fn test_found_once_per_transmitter() {
        let mut scanner = Scanner::new(ChannelId::default());
        assert_eq!(
            scanner.observe(id(1, 11), &POWER_PAGE),
            vec![ScanEvent::Found(id(1, 11))]
        );
        assert!(scanner.observe(id(1, 11), &POWER_PAGE).is_empty());
        assert_eq!(
            scanner.observe(id(2, 120), &POWER_PAGE),
            vec![ScanEvent::Found(id(2, 120))]
        );
        assert_eq!(scanner.found_count(), 2);
    }

    #[test]
    fn test_common_page_update() {
        let mut scanner = Scanner::new(ChannelId::default());
        scanner.observe(id(1, 11), &POWER_PAGE);
        assert_eq!(
            scanner.observe(id(1, 11), &PRODUCT_PAGE),
            vec![ScanEvent::Update(
                id(1, 11),
                CommonPage::ProductInfo {
                    sw_revision: 2,
                    serial_number: 1,
                }
            )]
        );
    }

    #[test]
    fn test_filter_by_device_type() {
        let mut scanner = Scanner::new(ChannelId {
            device_number: 0,
            device_type: 11,
            transmission_type: 0,
        });
        assert!(scanner.observe(id(9, 120), &POWER_PAGE).is_empty());
        assert_eq!(scanner.observe(id(9, 11), &POWER_PAGE).len(), 1);
    }
}

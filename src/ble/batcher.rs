//! Advertisement batching against a report delay.
//!
//! The report delay is the longest a report may sit in a batch. A batch
//! goes out when it fills, when the delay is zero, or when its deadline
//! (first report's timestamp plus the delay) passes. The platform layer
//! owns the clock: it calls [`ReportBatcher::poll`] at
//! [`ReportBatcher::deadline_ns`] and [`ReportBatcher::take`] when the scan
//! stops, so nothing is held back or lost.

use core::mem;

use crate::ble::{AdvertisingEvent, AdvertisingReport};

pub struct ReportBatcher {
    report_delay_ns: u64,
    pending: AdvertisingEvent,
    deadline_ns: Option<u64>,
}

impl ReportBatcher {
    pub fn new(report_delay_ms: u32) -> Self {
        Self {
            report_delay_ns: report_delay_ms as u64 * 1_000_000,
            pending: AdvertisingEvent::default(),
            deadline_ns: None,
        }
    }

    /// Add a report. Returns a batch that must go out now.
    pub fn push(&mut self, report: AdvertisingReport) -> Option<AdvertisingEvent> {
        if self.pending.reports.is_empty() {
            self.deadline_ns = Some(report.timestamp_ns.saturating_add(self.report_delay_ns));
        }
        // Never full here: a batch is handed out as soon as it fills.
        let _ = self.pending.reports.push(report);

        if self.report_delay_ns == 0 || self.pending.reports.is_full() {
            self.take()
        } else {
            None
        }
    }

    /// When the oldest held report is due, if any report is held.
    pub fn deadline_ns(&self) -> Option<u64> {
        self.deadline_ns
    }

    /// Hand out the batch if its deadline has passed.
    pub fn poll(&mut self, now_ns: u64) -> Option<AdvertisingEvent> {
        match self.deadline_ns {
            Some(deadline) if now_ns >= deadline => self.take(),
            _ => None,
        }
    }

    /// Hand out whatever is held, due or not.
    pub fn take(&mut self) -> Option<AdvertisingEvent> {
        self.deadline_ns = None;
        if self.pending.reports.is_empty() {
            None
        } else {
            Some(mem::take(&mut self.pending))
        }
    }

    pub fn len(&self) -> usize {
        self.pending.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.reports.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BLE_MAX_REPORTS_PER_EVENT;

    const MS: u64 = 1_000_000;

    fn report(timestamp_ns: u64) -> AdvertisingReport {
        AdvertisingReport {
            timestamp_ns,
            address: [0xA0; 6],
            rssi: -60,
            data: heapless::Vec::new(),
        }
    }

    #[test]
    fn zero_delay_hands_out_every_report() {
        let mut batcher = ReportBatcher::new(0);
        let event = batcher.push(report(5)).unwrap();
        assert_eq!(event.reports.len(), 1);
        assert!(batcher.is_empty());
        assert_eq!(batcher.deadline_ns(), None);
    }

    #[test]
    fn lone_report_is_due_at_its_deadline() {
        let mut batcher = ReportBatcher::new(1000);
        assert!(batcher.push(report(10 * MS)).is_none());
        assert_eq!(batcher.deadline_ns(), Some(1010 * MS));

        // Nothing else arrives; the deadline alone releases it.
        assert!(batcher.poll(1009 * MS).is_none());
        let event = batcher.poll(1010 * MS).unwrap();
        assert_eq!(event.reports[0].timestamp_ns, 10 * MS);
        assert_eq!(batcher.deadline_ns(), None);
    }

    #[test]
    fn deadline_follows_the_oldest_report() {
        let mut batcher = ReportBatcher::new(100);
        assert!(batcher.push(report(0)).is_none());
        assert!(batcher.push(report(60 * MS)).is_none());
        assert_eq!(batcher.deadline_ns(), Some(100 * MS));
        assert_eq!(batcher.poll(100 * MS).unwrap().reports.len(), 2);
    }

    #[test]
    fn full_batch_goes_out_before_its_deadline() {
        let mut batcher = ReportBatcher::new(60_000);
        for i in 0..BLE_MAX_REPORTS_PER_EVENT as u64 - 1 {
            assert!(batcher.push(report(i)).is_none());
        }
        let event = batcher.push(report(99)).unwrap();
        assert_eq!(event.reports.len(), BLE_MAX_REPORTS_PER_EVENT);
        assert!(batcher.is_empty());

        // The next report starts a fresh deadline.
        assert!(batcher.push(report(200 * MS)).is_none());
        assert_eq!(batcher.deadline_ns(), Some(60_200 * MS));
    }

    #[test]
    fn take_flushes_a_partial_batch_on_stop() {
        let mut batcher = ReportBatcher::new(5000);
        assert!(batcher.push(report(1)).is_none());
        assert!(batcher.push(report(2)).is_none());

        assert_eq!(batcher.take().unwrap().reports.len(), 2);
        assert!(batcher.take().is_none());
        assert!(batcher.poll(u64::MAX).is_none());
    }
}

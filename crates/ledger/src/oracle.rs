//! Oracle price series for one collateral class.

use vault_core::{Event, EventPayload, PricePoint, Timestamp};

/// Price updates of one collateral class, ascending and unique by timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OracleSeries {
    collateral_type: String,
    points: Vec<PricePoint>,
}

impl OracleSeries {
    /// Empty series.
    pub fn new(collateral_type: impl Into<String>) -> Self {
        Self {
            collateral_type: collateral_type.into(),
            points: Vec::new(),
        }
    }

    /// Build from arbitrary points. Of several points at one timestamp the
    /// last one given wins.
    pub fn from_points(collateral_type: impl Into<String>, mut points: Vec<PricePoint>) -> Self {
        points.sort_by_key(|p| p.timestamp);
        let mut unique: Vec<PricePoint> = Vec::with_capacity(points.len());
        for point in points {
            match unique.last_mut() {
                Some(last) if last.timestamp == point.timestamp => *last = point,
                _ => unique.push(point),
            }
        }
        Self {
            collateral_type: collateral_type.into(),
            points: unique,
        }
    }

    /// Build from `OraclePriceUpdate` events; updates for other classes and
    /// updates without a value are ignored. A missing spot price carries the
    /// previous one.
    pub fn from_events<'a, I>(collateral_type: &str, events: I) -> Self
    where
        I: IntoIterator<Item = &'a Event>,
    {
        let mut updates: Vec<&Event> = events
            .into_iter()
            .filter(|e| match &e.payload {
                EventPayload::OraclePriceUpdate {
                    collateral_type: ct,
                    ..
                } => ct == collateral_type,
                _ => false,
            })
            .collect();
        updates.sort_by(|a, b| a.chronological_cmp(b));

        let mut spot = 0.0;
        let mut points = Vec::with_capacity(updates.len());
        for event in updates {
            if let EventPayload::OraclePriceUpdate {
                new_value: Some(value),
                new_spot_price,
                ..
            } = &event.payload
            {
                spot = new_spot_price.unwrap_or(spot);
                points.push(PricePoint {
                    timestamp: event.timestamp,
                    value: *value,
                    spot_price: spot,
                });
            }
        }
        Self::from_points(collateral_type, points)
    }

    /// This series plus the given update events.
    pub fn merged_with<'a, I>(&self, events: I) -> Self
    where
        I: IntoIterator<Item = &'a Event>,
    {
        let extra = Self::from_events(&self.collateral_type, events);
        let mut points = self.points.clone();
        points.extend(extra.points);
        Self::from_points(self.collateral_type.clone(), points)
    }

    pub fn collateral_type(&self) -> &str {
        &self.collateral_type
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Latest update at or before `ts`.
    pub fn latest_at(&self, ts: Timestamp) -> Option<&PricePoint> {
        match self.points.binary_search_by_key(&ts, |p| p.timestamp) {
            Ok(i) => Some(&self.points[i]),
            Err(i) => {
                if i > 0 {
                    Some(&self.points[i - 1])
                } else {
                    None
                }
            }
        }
    }

    /// Query timestamps: the event timestamps plus `n` evenly spaced points
    /// between the first and last of them, ascending and unique. With fewer
    /// than two distinct timestamps `now` is appended.
    pub fn sample_timestamps(
        event_timestamps: &[Timestamp],
        n: usize,
        now: Timestamp,
    ) -> Vec<Timestamp> {
        let mut timestamps = event_timestamps.to_vec();
        timestamps.sort_unstable();
        timestamps.dedup();

        if let (Some(&first), Some(&last)) = (timestamps.first(), timestamps.last()) {
            if n > 0 && last > first {
                let span = i128::from(last - first);
                let steps = n.saturating_sub(1).max(1) as i128;
                for i in 0..n {
                    let offset = span * i as i128 / steps;
                    timestamps.push(first + offset as Timestamp);
                }
                timestamps.sort_unstable();
                timestamps.dedup();
            }
        }

        if timestamps.len() < 2 {
            timestamps.push(now);
            timestamps.sort_unstable();
            timestamps.dedup();
        }
        timestamps
    }

    /// Price at each sample timestamp; timestamps before the first update
    /// are omitted.
    pub fn sample(
        &self,
        event_timestamps: &[Timestamp],
        n: usize,
        now: Timestamp,
    ) -> Vec<PricePoint> {
        Self::sample_timestamps(event_timestamps, n, now)
            .into_iter()
            .filter_map(|ts| {
                self.latest_at(ts).map(|p| PricePoint {
                    timestamp: ts,
                    value: p.value,
                    spot_price: p.spot_price,
                })
            })
            .collect()
    }
}

//! Wire topic naming.
//!
//! Data-plane topics are scoped to one (publisher, subscriber) pair so a
//! subscriber's socket filter only ever matches traffic addressed to it.
//! Segments are `/`-separated; a group name or peer label containing `/`
//! is rejected to keep names collision-free and parseable.

use crate::BusError;

const STATE_SEGMENT: &str = "state";
const DATA_SEGMENT: &str = "data";

fn check_segment(segment: &str) -> Result<(), BusError> {
    if segment.is_empty() || segment.contains('/') {
        return Err(BusError::InvalidTopic(segment.to_string()));
    }
    Ok(())
}

/// Topic carrying membership status broadcasts for a group.
pub fn state_topic(base: &str) -> Result<String, BusError> {
    check_segment(base)?;
    Ok(format!("{base}/{STATE_SEGMENT}"))
}

/// Topic carrying data messages from one publisher to one subscriber.
pub fn data_topic(base: &str, publisher: &str, subscriber: &str) -> Result<String, BusError> {
    check_segment(base)?;
    check_segment(publisher)?;
    check_segment(subscriber)?;
    Ok(format!("{base}/{DATA_SEGMENT}/{publisher}/{subscriber}"))
}

/// Recover the group name from a state topic.
pub fn parse_state_topic(name: &str) -> Option<&str> {
    let (base, rest) = name.split_once('/')?;
    if rest != STATE_SEGMENT || base.is_empty() {
        return None;
    }
    Some(base)
}

/// Recover (group, publisher, subscriber) from a data topic.
pub fn parse_data_topic(name: &str) -> Option<(&str, &str, &str)> {
    let mut parts = name.split('/');
    let base = parts.next()?;
    if parts.next()? != DATA_SEGMENT {
        return None;
    }
    let publisher = parts.next()?;
    let subscriber = parts.next()?;
    if parts.next().is_some() || base.is_empty() || publisher.is_empty() || subscriber.is_empty() {
        return None;
    }
    Some((base, publisher, subscriber))
}

//! Patch assembly: observations in, one patch bucket per component out

use crate::classification::{Classification, ClassificationTable};
use crate::engine::timeslice::TimeSlice;
use crate::observation::{MetricSelector, Observation};
use crate::patch::{ComponentPatch, PatchOperation};
use std::collections::{HashMap, HashSet};

/// Series to align for a device: every telemetry-classified observation
///
/// Deduplicated, in input order.
pub fn telemetry_selectors(
    table: &ClassificationTable,
    properties: &[Observation],
) -> Vec<MetricSelector> {
    let mut seen = HashSet::new();
    properties
        .iter()
        .filter(|o| table.classify(&o.model, &o.field) == Classification::Telemetry)
        .map(Observation::selector)
        .filter(|selector| seen.insert(selector.clone()))
        .collect()
}

/// Reduce property observations to one per `(component, field)`
///
/// The latest `time` wins; on a tie the first seen is kept. Output keeps the
/// order in which each key first appeared.
fn latest_per_field<'a>(observations: impl Iterator<Item = &'a Observation>) -> Vec<&'a Observation> {
    let mut index: HashMap<(&str, &str), usize> = HashMap::new();
    let mut selected: Vec<&Observation> = Vec::new();

    for obs in observations {
        match index.get(&(obs.component_key(), obs.field.as_str())) {
            Some(&i) => {
                if obs.time > selected[i].time {
                    selected[i] = obs;
                }
            }
            None => {
                index.insert((obs.component_key(), obs.field.as_str()), selected.len());
                selected.push(obs);
            }
        }
    }

    selected
}

/// Build the per-component patch for one device
///
/// * every observed component with at least one non-ignored observation gets
///   a bucket, even if it ends up empty
/// * property observations become `replace /{field}`
/// * telemetry from the selected slice becomes `replace /Current{field}`
/// * ignored observations are dropped
pub fn assemble_patch(
    device: &str,
    table: &ClassificationTable,
    properties: &[Observation],
    slice: Option<&TimeSlice>,
) -> ComponentPatch {
    let mut patch = ComponentPatch::new(device);

    let classified = properties
        .iter()
        .map(|o| (o, table.classify(&o.model, &o.field)))
        .filter(|(_, class)| *class != Classification::Ignored);

    let mut property_observations = Vec::new();
    for (obs, class) in classified {
        patch.open_component(obs.component_key());
        if class == Classification::Property {
            property_observations.push(obs);
        }
    }

    for obs in latest_per_field(property_observations.into_iter()) {
        patch
            .open_component(obs.component_key())
            .push(PatchOperation::property(&obs.field, obs.value.clone()));
    }

    if let Some(slice) = slice {
        let mut snapshotted = HashSet::new();
        for obs in &slice.observations {
            if table.classify(&obs.model, &obs.field) != Classification::Telemetry {
                continue;
            }
            if !snapshotted.insert((obs.component_key(), obs.field.as_str())) {
                continue;
            }
            patch
                .open_component(obs.component_key())
                .push(PatchOperation::current(&obs.field, obs.value.clone()));
        }
    }

    patch
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    /// Observation drawn from a small vocabulary so keys collide often
    #[derive(Debug, Clone)]
    struct SmallObservation(Observation);

    impl Arbitrary for SmallObservation {
        fn arbitrary(g: &mut Gen) -> Self {
            let components = [None, Some("Boiler"), Some("Valve")];
            let models = ["dtmi:x;1", "dtmi:boiler;1", "dtmi:unknown;1"];
            let fields = ["t", "h", "temp", "Status", "Mode"];

            let base = Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap();
            let component = *g.choose(&components).unwrap();
            Self(Observation::new(
                "A",
                component,
                *g.choose(&models).unwrap(),
                *g.choose(&fields).unwrap(),
                base + Duration::minutes(i64::from(u8::arbitrary(g) % 5)),
                f64::from(u8::arbitrary(g)),
            ))
        }
    }

    fn table() -> ClassificationTable {
        ClassificationTable::new()
            .with_model("dtmi:x;1", ["t", "h"])
            .with_model("dtmi:boiler;1", ["temp"])
    }

    // Every non-ignored observation lands in the bucket for its own component
    #[quickcheck]
    fn prop_grouping_is_total(input: Vec<SmallObservation>) -> bool {
        let observations: Vec<Observation> = input.into_iter().map(|o| o.0).collect();
        let table = table();
        let patch = assemble_patch("A", &table, &observations, None);

        let expected: HashSet<&str> = observations
            .iter()
            .filter(|o| table.classify(&o.model, &o.field) != Classification::Ignored)
            .map(Observation::component_key)
            .collect();

        let property_paths_ok = observations
            .iter()
            .filter(|o| table.classify(&o.model, &o.field) == Classification::Property)
            .all(|o| {
                patch
                    .component(o.component_key())
                    .and_then(|doc| doc.value_at(&format!("/{}", o.field)))
                    .is_some()
            });

        patch.component_count() == expected.len()
            && expected.iter().all(|key| patch.component(key).is_some())
            && property_paths_ok
    }

    // Every path is backed by an observation in the same component: `/{field}`
    // by a property, `/Current{field}` by telemetry
    #[quickcheck]
    fn prop_paths_follow_classification(input: Vec<SmallObservation>) -> bool {
        let observations: Vec<Observation> = input.into_iter().map(|o| o.0).collect();
        let table = table();
        let slice = crate::engine::timeslice::earliest_slice(&observations);
        let patch = assemble_patch("A", &table, &observations, slice.as_ref());

        let allowed: HashSet<(&str, String)> = observations
            .iter()
            .filter_map(|o| match table.classify(&o.model, &o.field) {
                Classification::Property => Some((o.component_key(), format!("/{}", o.field))),
                Classification::Telemetry => {
                    Some((o.component_key(), format!("/Current{}", o.field)))
                }
                Classification::Ignored => None,
            })
            .collect();

        let ok = observations.iter().map(Observation::component_key).all(|key| {
            patch.component(key).map_or(true, |doc| {
                doc.operations()
                    .iter()
                    .all(|op| allowed.contains(&(key, op.path.clone())))
            })
        });
        ok
    }
}

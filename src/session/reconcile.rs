use crate::client::{ReadError, RemoteReader};
use crate::model::{Color, Coord, Operation, Region};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::{BTreeSet, HashMap};

/// Compare intended operations against authoritative remote state.
///
/// Returns the operations whose key does not currently hold the intended
/// payload, in original order. When a key appears more than once only its
/// last operation counts. Keys the remote does not report are missing.
pub async fn find_missing(
    reader: &dyn RemoteReader,
    operations: &[Operation],
    region_size: u32,
    read_concurrency: usize,
) -> Result<Vec<Operation>, ReadError> {
    // key -> index of its last operation
    let mut last_write: HashMap<Coord, usize> = HashMap::with_capacity(operations.len());
    for (index, op) in operations.iter().enumerate() {
        last_write.insert(op.key, index);
    }

    let regions: BTreeSet<Region> = last_write
        .keys()
        .map(|key| Region::covering(*key, region_size))
        .collect();

    tracing::info!(
        operations = operations.len(),
        keys = last_write.len(),
        regions = regions.len(),
        "Reading remote state for validation"
    );

    let snapshots: Vec<HashMap<Coord, Color>> = stream::iter(regions)
        .map(|region| reader.read_region(region))
        .buffer_unordered(read_concurrency.max(1))
        .try_collect()
        .await?;

    let mut remote: HashMap<Coord, Color> = HashMap::new();
    for snapshot in snapshots {
        remote.extend(snapshot);
    }

    let missing: Vec<Operation> = operations
        .iter()
        .enumerate()
        .filter(|(index, op)| last_write.get(&op.key) == Some(index))
        .filter(|(_, op)| remote.get(&op.key) != Some(&op.payload))
        .map(|(_, op)| *op)
        .collect();

    tracing::info!(missing = missing.len(), "Validation complete");
    Ok(missing)
}

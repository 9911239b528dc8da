use snowflake::SnowflakeIdBucket;
use std::sync::{Mutex, MutexGuard};

struct Generator {
    machine_id: i32,
    node_id: i32,
    bucket: SnowflakeIdBucket,
}

impl Generator {
    fn new(machine_id: i32, node_id: i32) -> Self {
        Self {
            machine_id,
            node_id,
            bucket: SnowflakeIdBucket::new(machine_id, node_id),
        }
    }
}

static ID_GENERATOR: Mutex<Option<Generator>> = Mutex::new(None);

fn generator() -> MutexGuard<'static, Option<Generator>> {
    ID_GENERATOR
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Initializes the snowflake generator.
///
/// `machine_id` and `node_id` must each be in `0..32`; two server instances
/// writing to the same store need distinct pairs. Re-initializing with the
/// current pair keeps the running sequence.
pub fn init(machine_id: i32, node_id: i32) {
    let mut gen = generator();
    let current = matches!(
        gen.as_ref(),
        Some(g) if g.machine_id == machine_id && g.node_id == node_id
    );
    if !current {
        *gen = Some(Generator::new(machine_id, node_id));
    }
}

/// Returns a new snowflake id in decimal form. Falls back to `(1, 1)` when
/// [`init`] was never called.
pub fn next_id() -> String {
    let mut gen = generator();
    let g = gen.get_or_insert_with(|| Generator::new(1, 1));
    g.bucket.get_id().to_string()
}

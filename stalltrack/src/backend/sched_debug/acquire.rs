use std::{fs::File, io::Read, path::Path};

use anyhow::{Context, Result};
use log::{info, warn};

use crate::backend::RawBuffer;

/// Pages per growth step when sizing the buffer at startup.
pub const BUFFER_PAGES: usize = 10;

pub fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as usize } else { 4096 }
}

/// Growth step used while sizing the buffer at startup.
pub fn buffer_unit() -> usize {
    BUFFER_PAGES * page_size()
}

/// Read the current sample into `buffer`.
///
/// Any open/read failure is reported and yields 0. When the sample leaves
/// too little headroom, the buffer's capacity is doubled for the next read.
pub fn read_sample(path: &Path, buffer: &mut RawBuffer) -> usize {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            warn!("Failed to open {}: {}", path.display(), e);
            buffer.clear();
            return 0;
        }
    };

    let n = match buffer.fill_from(file) {
        Ok(n) => n,
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            return 0;
        }
    };

    buffer.grow_if_tight();
    n
}

/// Read the whole source, growing by `unit` bytes per chunk until EOF.
///
/// Returns the contents and the capacity that was needed to hold them.
pub fn read_whole(path: &Path, unit: usize) -> Result<(Vec<u8>, usize)> {
    let mut file = File::open(path)
        .with_context(|| format!("error opening {} for reading", path.display()))?;

    let mut capacity = unit;
    let mut data = Vec::with_capacity(capacity);
    loop {
        let n = file
            .by_ref()
            .take(unit as u64)
            .read_to_end(&mut data)
            .with_context(|| format!("error reading {}", path.display()))?;
        if n == 0 {
            break;
        }
        capacity += unit;
        data.reserve(unit);
    }

    info!("initial buffer capacity set to {}", capacity);
    Ok((data, capacity))
}

const CPU_PREFIX: &str = "cpu#";

/// Header that opens a CPU's section of sched_debug.
///
/// x86 prints `cpu#N, <freq> MHz`, other architectures just `cpu#N`.
pub fn cpu_header(cpu: usize) -> String {
    if cfg!(any(target_arch = "x86", target_arch = "x86_64")) {
        format!("{}{},", CPU_PREFIX, cpu)
    } else {
        format!("{}{}\n", CPU_PREFIX, cpu)
    }
}

/// Copy out the section of `buffer` that belongs to `cpu`, from its header
/// up to the next CPU header or the end of the buffer.
///
/// `None` when the CPU has no section, which is normal for offline CPUs.
pub fn extract_cpu_block(buffer: &str, cpu: usize) -> Option<String> {
    let header = cpu_header(cpu);
    let start = buffer.find(&header)?;

    let body = start + header.len();
    let end = buffer[body..]
        .find(CPU_PREFIX)
        .map(|next| body + next)
        .unwrap_or(buffer.len());

    if end <= start {
        return None;
    }

    Some(buffer[start..end].to_string())
}

#[cfg(test)]
pub(crate) fn header_line(cpu: usize) -> String {
    if cfg!(any(target_arch = "x86", target_arch = "x86_64")) {
        format!("cpu#{}, 2394.374 MHz\n", cpu)
    } else {
        format!("cpu#{}\n", cpu)
    }
}

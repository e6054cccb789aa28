//! Division of one table rotation into per-cycle step counts.
//!
//! The table must come back to its starting orientation after all coating
//! cycles, so the full-rotation step count is split into `cycles` chunks
//! that sum to it exactly. Integer division leaves a remainder; one extra
//! step goes to each of the earliest cycles until the remainder is spent,
//! which keeps any two chunks within one step of each other.

/// Steps for one full table rotation: 3200 motor steps per revolution
/// through the 1.6 gear ratio.
pub const ONE_ROTATION_STEPS: i32 = 5120;

/// Per-cycle rotation step counts summing exactly to `total_steps`.
///
/// `cycles` must be validated (>= 1) before calling; a zero cycle count
/// yields an empty schedule rather than dividing by zero.
pub fn plan(cycles: u32, total_steps: i32) -> Vec<i32> {
    if cycles == 0 {
        return Vec::new();
    }

    let cycles = cycles as i32;
    let base = total_steps / cycles;
    let remainder = total_steps % cycles;

    (0..cycles)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_sums_to_full_rotation() {
        for cycles in 1..=12 {
            let schedule = plan(cycles, ONE_ROTATION_STEPS);
            assert_eq!(schedule.len(), cycles as usize);
            assert_eq!(
                schedule.iter().sum::<i32>(),
                ONE_ROTATION_STEPS,
                "schedule for {} cycles does not sum to a full rotation",
                cycles
            );
        }
    }

    #[test]
    fn test_chunks_differ_by_at_most_one() {
        for cycles in 1..=12 {
            let schedule = plan(cycles, ONE_ROTATION_STEPS);
            let min = schedule.iter().min().copied().unwrap_or(0);
            let max = schedule.iter().max().copied().unwrap_or(0);
            assert!(max - min <= 1, "uneven schedule for {} cycles", cycles);
            assert!(min > 0, "non-positive chunk for {} cycles", cycles);
        }
    }

    #[test]
    fn test_three_cycles() {
        // 5120 = 3 * 1706 + 2; the two extra steps land on the first cycles.
        assert_eq!(plan(3, ONE_ROTATION_STEPS), vec![1707, 1707, 1706]);
    }

    #[test]
    fn test_single_cycle_takes_the_whole_rotation() {
        assert_eq!(plan(1, ONE_ROTATION_STEPS), vec![5120]);
    }

    #[test]
    fn test_zero_cycles_is_empty() {
        assert!(plan(0, ONE_ROTATION_STEPS).is_empty());
    }
}

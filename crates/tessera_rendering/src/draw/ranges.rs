//! Draw range building.

use super::output::DrawRange;
use super::settings::FilterSettings;

/// Caps of a single draw range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeCaps {
    /// Instances per range.
    pub max_instances: u32,
    /// Commands per range.
    pub max_commands: u32,
}

/// Groups consecutive commands into ranges.
///
/// `commands` yields `(filter_index, instance_count)` in command order. A
/// command joins the open range if it shares the filter index and both caps
/// still hold afterwards; otherwise it opens a new range. A lone command
/// above the instance cap still gets a range of its own.
pub fn build_ranges(
    commands: impl IntoIterator<Item = (u16, u32)>,
    caps: RangeCaps,
    filters: &[FilterSettings],
    out: &mut Vec<DrawRange>,
) {
    let first_range = out.len();
    let mut command_index = 0u32;
    for (filter_index, instances) in commands {
        let extend = out[first_range..].last().is_some_and(|range| {
            range.filter_index == filter_index
                && range.instance_count + instances <= caps.max_instances
                && range.command_count < caps.max_commands
        });

        if extend {
            if let Some(range) = out.last_mut() {
                range.command_count += 1;
                range.instance_count += instances;
            }
        } else {
            out.push(DrawRange {
                filter_index,
                filter_settings: filters
                    .get(usize::from(filter_index))
                    .copied()
                    .unwrap_or_default(),
                first_command: command_index,
                command_count: 1,
                instance_count: instances,
            });
        }
        command_index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPS: RangeCaps = RangeCaps {
        max_instances: 4096,
        max_commands: 512,
    };

    fn filters() -> Vec<FilterSettings> {
        vec![
            FilterSettings::default(),
            FilterSettings {
                render_layer: 3,
                ..FilterSettings::default()
            },
        ]
    }

    #[test]
    fn test_same_filter_merges() {
        // A=0, B=1
        let mut ranges = Vec::new();
        build_ranges([(0, 10), (0, 10), (1, 5)], CAPS, &filters(), &mut ranges);

        assert_eq!(ranges.len(), 2);
        assert_eq!(
            (ranges[0].filter_index, ranges[0].command_count, ranges[0].instance_count),
            (0, 2, 20)
        );
        assert_eq!(
            (ranges[1].filter_index, ranges[1].first_command, ranges[1].command_count, ranges[1].instance_count),
            (1, 2, 1, 5)
        );
        assert_eq!(ranges[1].filter_settings.render_layer, 3);
    }

    #[test]
    fn test_caps_split_ranges() {
        let caps = RangeCaps {
            max_instances: 25,
            max_commands: 2,
        };
        let mut ranges = Vec::new();
        build_ranges([(0, 10), (0, 10), (0, 1), (0, 20), (0, 10), (0, 40)], caps, &filters(), &mut ranges);

        let shape: Vec<(u32, u32, u32)> = ranges
            .iter()
            .map(|range| (range.first_command, range.command_count, range.instance_count))
            .collect();
        // Command cap closes the first range, instance cap the second.
        assert_eq!(shape, vec![(0, 2, 20), (2, 2, 21), (4, 1, 10), (5, 1, 40)]);
    }

    #[test]
    fn test_filter_change_always_splits() {
        let mut ranges = Vec::new();
        build_ranges([(0, 1), (1, 1), (0, 1)], CAPS, &filters(), &mut ranges);
        assert_eq!(ranges.len(), 3);
    }
}

//! MultiChannel container: partitions the channel range across the
//! children.

use crate::buffer::ProcessData;
use crate::error::NodeError;
use crate::node::NodeHandle;

/// Partitioning policy: children with a fixed channel requirement are
/// serviced first, the remaining channels are divided evenly among the
/// rest, and a child whose own layout change triggered a re-partition
/// keeps its allocation instead of taking part in the recompute.
pub struct Multi {
    assignments: Vec<usize>,
}

impl Multi {
    pub fn new() -> Self {
        Self {
            assignments: Vec::new(),
        }
    }

    #[inline]
    pub(crate) fn assignments(&self) -> &[usize] {
        &self.assignments
    }

    pub(crate) fn partition(
        &mut self,
        channels: usize,
        children: &[NodeHandle],
        keep: Option<usize>,
    ) -> Result<(), NodeError> {
        if children.is_empty() {
            self.assignments.clear();
            return Ok(());
        }
        if children.len() > channels {
            self.assignments.clear();
            return Err(NodeError::TooManyChildNodes {
                channels,
                children: children.len(),
            });
        }

        let previous = std::mem::take(&mut self.assignments);
        let mut assignments = vec![0usize; children.len()];
        let mut pool = channels;

        if let Some(index) = keep {
            let held = previous.get(index).copied().unwrap_or(0);
            if held <= pool {
                assignments[index] = held;
                pool -= held;
            }
        }

        let mut flexible = Vec::with_capacity(children.len());
        for (index, child) in children.iter().enumerate() {
            if Some(index) == keep {
                continue;
            }
            match child.descriptor().fixed_channels {
                Some(fixed) => {
                    if fixed > pool {
                        return Err(NodeError::TooManyChildNodes {
                            channels,
                            children: children.len(),
                        });
                    }
                    assignments[index] = fixed;
                    pool -= fixed;
                }
                None => flexible.push(index),
            }
        }

        if !flexible.is_empty() {
            if pool < flexible.len() {
                return Err(NodeError::TooManyChildNodes {
                    channels,
                    children: children.len(),
                });
            }
            let base = pool / flexible.len();
            let mut remainder = pool % flexible.len();
            for &index in &flexible {
                assignments[index] = base + usize::from(remainder > 0);
                remainder = remainder.saturating_sub(1);
            }
        }

        self.assignments = assignments;
        Ok(())
    }

    pub(crate) fn process(&mut self, children: &[NodeHandle], data: &mut ProcessData<'_, '_>) {
        let mut cursor = 0;
        for (child, &alloc) in children.iter().zip(&self.assignments) {
            if alloc == 0 {
                continue;
            }
            if cursor + alloc > data.num_channels() {
                break;
            }
            let mut sub = data.channel_range(cursor, alloc);
            child.process(&mut sub);
            cursor += alloc;
        }
    }
}

impl Default for Multi {
    fn default() -> Self {
        Self::new()
    }
}

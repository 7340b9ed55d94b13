//! ND-range validation and kernel submission
//!
//! An ND-range becomes a [`DispatchGrid`]: the global size is split into
//! threadgroups of the local size, both padded to three dimensions with 1.
//! Every check runs before anything is submitted, so a rejected launch
//! leaves no event behind.

use log::debug;

use super::Runtime;
use super::kernel::Kernel;
use super::queue::{Command, Queue};
use crate::backend::{Binding, DispatchGrid};
use crate::error::{ClError, Result};
use crate::handle::{EventId, KernelId, QueueId};
use crate::types::*;

/// Largest divisor of `n` that does not exceed `limit`
fn largest_divisor(n: usize, limit: usize) -> usize {
    (1..=limit.min(n).max(1))
        .rev()
        .find(|d| n % d == 0)
        .unwrap_or(1)
}

/// Pick a local size that divides the global size within the limits
fn auto_local_size(global: &[usize], max_items: &[usize; 3], max_group: usize) -> [usize; 3] {
    let mut local = [1; 3];
    let mut budget = max_group.max(1);
    for (d, &size) in global.iter().enumerate() {
        local[d] = largest_divisor(size, budget.min(max_items[d]));
        budget /= local[d];
    }
    local
}

fn pad(values: &[usize], fill: usize) -> [usize; 3] {
    let mut out = [fill; 3];
    out[..values.len()].copy_from_slice(values);
    out
}

impl Runtime {
    /// Launch `kernel` over an ND-range
    ///
    /// `local_size` may be omitted, in which case the kernel's required
    /// work-group size is used when it has one and a divisor of the global
    /// size is chosen otherwise.
    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_nd_range_kernel(
        &self,
        queue: QueueId,
        kernel: KernelId,
        work_dim: u32,
        global_offset: Option<&[usize]>,
        global_size: &[usize],
        local_size: Option<&[usize]>,
        wait_list: &[EventId],
    ) -> Result<EventId> {
        let q = self.resolve::<Queue>(queue)?;
        let k = self.resolve::<Kernel>(kernel)?;
        let launch = self.validate_range(&q, &k, work_dim, global_offset, global_size, local_size)?;
        self.submit_kernel(&q, &k, launch, CL_COMMAND_NDRANGE_KERNEL, wait_list)
    }

    /// Launch `kernel` as a single work-item
    pub fn enqueue_task(
        &self,
        queue: QueueId,
        kernel: KernelId,
        wait_list: &[EventId],
    ) -> Result<EventId> {
        let q = self.resolve::<Queue>(queue)?;
        let k = self.resolve::<Kernel>(kernel)?;
        let launch = self.validate_range(&q, &k, 1, None, &[1], Some(&[1]))?;
        self.submit_kernel(&q, &k, launch, CL_COMMAND_TASK, wait_list)
    }

    fn validate_range(
        &self,
        queue: &Queue,
        kernel: &Kernel,
        work_dim: u32,
        global_offset: Option<&[usize]>,
        global_size: &[usize],
        local_size: Option<&[usize]>,
    ) -> Result<(DispatchGrid, Vec<Binding>)> {
        if !(1..=3).contains(&work_dim) {
            return Err(ClError::InvalidWorkDimension);
        }
        let dims = work_dim as usize;
        let lengths_match = global_size.len() == dims
            && global_offset.is_none_or(|o| o.len() == dims)
            && local_size.is_none_or(|l| l.len() == dims);
        if !lengths_match {
            return Err(ClError::InvalidWorkDimension);
        }
        if global_size.contains(&0) {
            return Err(ClError::InvalidGlobalWorkSize);
        }
        let zeros = [0usize; 3];
        let offset = global_offset.unwrap_or(&zeros[..dims]);
        if global_size
            .iter()
            .zip(offset)
            .any(|(g, o)| g.checked_add(*o).is_none())
        {
            return Err(ClError::InvalidGlobalOffset);
        }

        let device = queue.device()?;
        let desc = device.descriptor();
        let pipeline = kernel
            .pipeline(queue.device_id())
            .ok_or(ClError::InvalidProgramExecutable)?;
        let max_group = kernel.max_work_group_size(device, pipeline.as_ref());
        let reqd = kernel.signature().reqd_work_group_size;

        let local = match (local_size, reqd) {
            (Some(local), _) => pad(local, 1),
            (None, Some(reqd)) => reqd,
            (None, None) => auto_local_size(global_size, &desc.max_work_item_sizes, max_group),
        };
        let global = pad(global_size, 1);
        if local
            .iter()
            .zip(&global)
            .any(|(l, g)| *l == 0 || g % l != 0)
        {
            return Err(ClError::InvalidWorkGroupSize);
        }
        if local
            .iter()
            .zip(&desc.max_work_item_sizes)
            .any(|(l, max)| l > max)
        {
            return Err(ClError::InvalidWorkItemSize);
        }
        let group_len: usize = local.iter().product();
        if group_len > max_group {
            return Err(ClError::InvalidWorkGroupSize);
        }
        if reqd.is_some_and(|r| r != local) {
            return Err(ClError::InvalidWorkGroupSize);
        }
        let bindings = kernel.bindings()?;

        if kernel.context_id() != queue.context_id() {
            return Err(ClError::InvalidContext);
        }
        let local_mem = kernel.local_mem_size() as u64;
        if local_mem > desc.local_mem_size {
            return Err(ClError::OutOfResources(format!(
                "kernel needs {} bytes of local memory, device has {}",
                local_mem, desc.local_mem_size
            )));
        }
        let grid = DispatchGrid {
            work_dim,
            global_offset: pad(offset, 0),
            global_size: global,
            local_size: local,
        };
        Ok((grid, bindings))
    }

    fn submit_kernel(
        &self,
        queue: &Queue,
        kernel: &Kernel,
        (grid, bindings): (DispatchGrid, Vec<Binding>),
        command_type: cl_command_type,
        wait_list: &[EventId],
    ) -> Result<EventId> {
        let wait = self.resolve_wait_list(queue.context_id(), wait_list)?;
        let pipeline = kernel
            .pipeline(queue.device_id())
            .ok_or(ClError::InvalidProgramExecutable)?
            .clone();
        debug!(
            "Enqueue '{}': global {:?}, local {:?}, offset {:?}",
            kernel.name(),
            &grid.global_size[..grid.work_dim as usize],
            &grid.local_size[..grid.work_dim as usize],
            &grid.global_offset[..grid.work_dim as usize]
        );
        let command = Command::Dispatch {
            name: kernel.name().to_string(),
            pipeline,
            bindings,
            grid,
        };
        Ok(self.submit_command(queue, command_type, command, wait)?.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(&[1024], [256, 1, 1])]
    #[case(&[100], [100, 1, 1])]
    #[case(&[1000], [250, 1, 1])]
    #[case(&[97], [97, 1, 1])]
    #[case(&[64, 64], [64, 4, 1])]
    #[case(&[7, 5, 3], [7, 5, 3])]
    fn test_auto_local_size(#[case] global: &[usize], #[case] expected: [usize; 3]) {
        assert_eq!(auto_local_size(global, &[256, 256, 64], 256), expected);
    }

    #[test]
    fn test_auto_local_size_respects_item_limits() {
        assert_eq!(auto_local_size(&[64, 64], &[16, 256, 1], 256), [16, 16, 1]);
    }

    #[test]
    fn test_largest_divisor() {
        assert_eq!(largest_divisor(12, 5), 4);
        assert_eq!(largest_divisor(13, 12), 1);
        assert_eq!(largest_divisor(1, 256), 1);
    }
}

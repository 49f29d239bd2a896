use super::app_data;
use super::error::RendererError;

use anyhow::Result;
use log::*;
use vulkanalia::prelude::v1_0::*;

/// Synchronization objects of one frame in flight.
#[derive(Copy, Clone, Debug, Default)]
pub struct FrameSlot {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

pub unsafe fn create_sync_objects(device: &Device, frames_in_flight: usize, data: &mut app_data::Data) -> Result<()> {
    let semaphore_info = vk::SemaphoreCreateInfo::builder();
    // Signaled so the first wait on every slot returns at once.
    let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

    for _ in 0..frames_in_flight {
        let mut slot = FrameSlot::default();
        let created = (|| -> Result<()> {
            slot.image_available = device.create_semaphore(&semaphore_info, None)?;
            slot.render_finished = device.create_semaphore(&semaphore_info, None)?;
            slot.in_flight = device.create_fence(&fence_info, None)?;
            Ok(())
        })();

        if let Err(e) = created {
            destroy_slot(device, &slot);
            return Err(e);
        }

        data.frames.push(slot);
    }

    data.images_in_flight = data.swapchain_images.iter().map(|_| vk::Fence::null()).collect();

    debug!("Created {} frame slots.", frames_in_flight);

    Ok(())
}

unsafe fn destroy_slot(device: &Device, slot: &FrameSlot) {
    device.destroy_fence(slot.in_flight, None);
    device.destroy_semaphore(slot.render_finished, None);
    device.destroy_semaphore(slot.image_available, None);
}

pub unsafe fn destroy_sync_objects(device: &Device, data: &mut app_data::Data) {
    data.frames.drain(..).for_each(|s| destroy_slot(device, &s));
    data.images_in_flight.clear();
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presented,
}

impl SlotState {
    fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Acquiring => "acquiring",
            Self::Recording => "recording",
            Self::Submitted => "submitted",
            Self::Presented => "presented",
        }
    }
}

/// Host-side bookkeeping of the frame slots. Tracks which slot is active
/// and refuses steps taken out of order.
#[derive(Clone, Debug)]
pub struct FramePacer {
    states: Vec<SlotState>,
    current: usize,
    presented: u64,
}

impl FramePacer {
    pub fn new(frames_in_flight: usize) -> Self {
        Self { states: vec![SlotState::Idle; frames_in_flight], current: 0, presented: 0 }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn state(&self, slot: usize) -> Option<SlotState> {
        self.states.get(slot).copied()
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    /// Slots whose submission has not yet been observed through their fence.
    pub fn in_flight(&self) -> usize {
        self.states
            .iter()
            .filter(|s| matches!(s, SlotState::Submitted | SlotState::Presented))
            .count()
    }

    fn step(&mut self, step: &'static str, from: &[SlotState], to: SlotState) -> Result<usize> {
        let state = self.states[self.current];
        if !from.contains(&state) {
            return Err(RendererError::FrameOrder { slot: self.current, step, state: state.name() }.into());
        }
        self.states[self.current] = to;
        Ok(self.current)
    }

    /// The current slot's fence has signalled.
    pub fn fence_waited(&mut self) -> Result<usize> {
        self.step("wait", &[SlotState::Idle, SlotState::Presented], SlotState::Idle)
    }

    pub fn acquire(&mut self) -> Result<usize> {
        self.step("acquire", &[SlotState::Idle], SlotState::Acquiring)
    }

    pub fn record(&mut self) -> Result<usize> {
        self.step("record", &[SlotState::Acquiring], SlotState::Recording)
    }

    pub fn submit(&mut self) -> Result<usize> {
        self.step("submit", &[SlotState::Recording], SlotState::Submitted)
    }

    /// Marks the frame presented and moves on to the next slot.
    pub fn present(&mut self) -> Result<usize> {
        let slot = self.step("present", &[SlotState::Submitted], SlotState::Presented)?;
        self.current = (self.current + 1) % self.states.len();
        self.presented += 1;
        Ok(slot)
    }

    /// Abandons a frame that failed before submission. The slot's fence is still signalled.
    pub fn abort(&mut self) -> Result<usize> {
        self.step("abort", &[SlotState::Acquiring, SlotState::Recording], SlotState::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draw(pacer: &mut FramePacer) -> usize {
        let slot = pacer.fence_waited().unwrap();
        pacer.acquire().unwrap();
        pacer.record().unwrap();
        pacer.submit().unwrap();
        pacer.present().unwrap();
        slot
    }

    #[test]
    fn five_draws_cycle_three_slots() {
        let mut pacer = FramePacer::new(3);
        let slots = (0..5).map(|_| draw(&mut pacer)).collect::<Vec<_>>();
        assert_eq!(slots, vec![0, 1, 2, 0, 1]);
        assert_eq!(pacer.presented(), 5);
        assert_eq!(pacer.current(), 2);
    }

    #[test]
    fn in_flight_never_exceeds_slot_count() {
        let mut pacer = FramePacer::new(3);
        for _ in 0..50 {
            draw(&mut pacer);
            assert!(pacer.in_flight() <= 3);
        }
        assert_eq!(pacer.in_flight(), 3);
    }

    #[test]
    fn fence_wait_returns_slot_to_idle() {
        let mut pacer = FramePacer::new(3);
        for _ in 0..3 {
            draw(&mut pacer);
        }
        assert_eq!(pacer.state(0), Some(SlotState::Presented));
        pacer.fence_waited().unwrap();
        assert_eq!(pacer.state(0), Some(SlotState::Idle));
        assert_eq!(pacer.in_flight(), 2);
    }

    #[test]
    fn slot_cannot_be_reused_before_its_fence() {
        let mut pacer = FramePacer::new(1);
        draw(&mut pacer);
        let error = pacer.acquire().unwrap_err();
        assert!(matches!(
            error.downcast_ref::<RendererError>(),
            Some(RendererError::FrameOrder { slot: 0, step: "acquire", .. })
        ));
    }

    #[test]
    fn present_requires_submission() {
        let mut pacer = FramePacer::new(3);
        pacer.fence_waited().unwrap();
        pacer.acquire().unwrap();
        assert!(pacer.present().is_err());
        assert_eq!(pacer.current(), 0);
    }

    #[test]
    fn aborted_frame_keeps_slot() {
        let mut pacer = FramePacer::new(3);
        pacer.fence_waited().unwrap();
        pacer.acquire().unwrap();
        pacer.abort().unwrap();
        assert_eq!(pacer.state(0), Some(SlotState::Idle));
        assert_eq!(draw(&mut pacer), 0);
    }

    #[test]
    fn failed_submission_blocks_the_slot() {
        let mut pacer = FramePacer::new(3);
        pacer.fence_waited().unwrap();
        pacer.acquire().unwrap();
        pacer.record().unwrap();
        assert!(pacer.fence_waited().is_err());
    }
}

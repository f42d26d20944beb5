//! Per-frame GPU light list

use super::{DirectionalLightData, EnvLightData, LightData};
use crate::command::{CommandSink, GlobalBuffer};
use crate::config::LightCapacities;
use crate::error::Result;

/// GPU light records for one frame, grouped by category.
///
/// Every record list is paired with a cull index list mapping the record
/// back to its position in the frame's visible light (or probe) input, so
/// `records.len() == cull_indices.len()` always holds. Lists are emptied
/// at the start of each frame and refilled in place.
#[derive(Debug, Clone)]
pub struct LightList {
    capacities: LightCapacities,
    directional_lights: Vec<DirectionalLightData>,
    directional_cull_indices: Vec<usize>,
    punctual_lights: Vec<LightData>,
    punctual_cull_indices: Vec<usize>,
    area_lights: Vec<LightData>,
    area_cull_indices: Vec<usize>,
    env_lights: Vec<EnvLightData>,
    env_cull_indices: Vec<usize>,
    allocated: bool,
}

impl LightList {
    /// Create an empty list with room for `capacities` records.
    pub fn with_capacities(capacities: LightCapacities) -> Self {
        Self {
            directional_lights: Vec::with_capacity(capacities.max_directional_lights),
            directional_cull_indices: Vec::with_capacity(capacities.max_directional_lights),
            punctual_lights: Vec::with_capacity(capacities.max_punctual_lights),
            punctual_cull_indices: Vec::with_capacity(capacities.max_punctual_lights),
            area_lights: Vec::with_capacity(capacities.max_area_lights),
            area_cull_indices: Vec::with_capacity(capacities.max_area_lights),
            env_lights: Vec::with_capacity(capacities.max_env_lights),
            env_cull_indices: Vec::with_capacity(capacities.max_env_lights),
            allocated: false,
            capacities,
        }
    }

    /// Category limits.
    pub fn capacities(&self) -> &LightCapacities {
        &self.capacities
    }

    /// Empty every list, keeping allocations.
    pub fn clear(&mut self) {
        self.directional_lights.clear();
        self.directional_cull_indices.clear();
        self.punctual_lights.clear();
        self.punctual_cull_indices.clear();
        self.area_lights.clear();
        self.area_cull_indices.clear();
        self.env_lights.clear();
        self.env_cull_indices.clear();
    }

    pub fn directional_lights(&self) -> &[DirectionalLightData] {
        &self.directional_lights
    }

    pub fn directional_cull_indices(&self) -> &[usize] {
        &self.directional_cull_indices
    }

    pub fn punctual_lights(&self) -> &[LightData] {
        &self.punctual_lights
    }

    pub fn punctual_cull_indices(&self) -> &[usize] {
        &self.punctual_cull_indices
    }

    pub fn area_lights(&self) -> &[LightData] {
        &self.area_lights
    }

    pub fn area_cull_indices(&self) -> &[usize] {
        &self.area_cull_indices
    }

    pub fn env_lights(&self) -> &[EnvLightData] {
        &self.env_lights
    }

    pub fn env_cull_indices(&self) -> &[usize] {
        &self.env_cull_indices
    }

    /// Punctual plus area lights, the set tiles are built over.
    pub fn finite_light_count(&self) -> usize {
        self.punctual_lights.len() + self.area_lights.len()
    }

    pub(crate) fn has_directional_room(&self) -> bool {
        self.directional_lights.len() < self.capacities.max_directional_lights
    }

    pub(crate) fn has_punctual_room(&self) -> bool {
        self.punctual_lights.len() < self.capacities.max_punctual_lights
    }

    pub(crate) fn has_area_room(&self) -> bool {
        self.area_lights.len() < self.capacities.max_area_lights
    }

    pub(crate) fn has_env_room(&self) -> bool {
        self.env_lights.len() < self.capacities.max_env_lights
    }

    pub(crate) fn push_directional(&mut self, data: DirectionalLightData, cull_index: usize) {
        debug_assert!(self.has_directional_room());
        self.directional_lights.push(data);
        self.directional_cull_indices.push(cull_index);
    }

    pub(crate) fn push_punctual(&mut self, data: LightData, cull_index: usize) {
        debug_assert!(self.has_punctual_room());
        self.punctual_lights.push(data);
        self.punctual_cull_indices.push(cull_index);
    }

    pub(crate) fn push_area(&mut self, data: LightData, cull_index: usize) {
        debug_assert!(self.has_area_room());
        self.area_lights.push(data);
        self.area_cull_indices.push(cull_index);
    }

    pub(crate) fn push_env(&mut self, data: EnvLightData, cull_index: usize) {
        debug_assert!(self.has_env_room());
        self.env_lights.push(data);
        self.env_cull_indices.push(cull_index);
    }

    /// Allocate the four light buffers at full capacity on first use.
    pub fn ensure_allocated(&mut self, sink: &mut dyn CommandSink) -> Result<()> {
        if self.allocated {
            return Ok(());
        }
        let caps = self.capacities;
        for (buffer, count, stride) in [
            (
                GlobalBuffer::DirectionalLights,
                caps.max_directional_lights,
                std::mem::size_of::<DirectionalLightData>(),
            ),
            (
                GlobalBuffer::PunctualLights,
                caps.max_punctual_lights,
                std::mem::size_of::<LightData>(),
            ),
            (
                GlobalBuffer::AreaLights,
                caps.max_area_lights,
                std::mem::size_of::<LightData>(),
            ),
            (
                GlobalBuffer::EnvLights,
                caps.max_env_lights,
                std::mem::size_of::<EnvLightData>(),
            ),
        ] {
            // Zero-capacity categories still get one record so the binding is valid.
            let size = (count.max(1) * stride) as u64;
            sink.allocate_buffer(buffer, size)?;
        }
        self.allocated = true;
        Ok(())
    }

    /// Upload every record list to its global buffer.
    pub fn upload(&self, sink: &mut dyn CommandSink) {
        sink.set_global_buffer(
            GlobalBuffer::DirectionalLights,
            bytemuck::cast_slice(&self.directional_lights),
        );
        sink.set_global_buffer(
            GlobalBuffer::PunctualLights,
            bytemuck::cast_slice(&self.punctual_lights),
        );
        sink.set_global_buffer(
            GlobalBuffer::AreaLights,
            bytemuck::cast_slice(&self.area_lights),
        );
        sink.set_global_buffer(
            GlobalBuffer::EnvLights,
            bytemuck::cast_slice(&self.env_lights),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, CommandList};

    fn light() -> LightData {
        bytemuck::Zeroable::zeroed()
    }

    #[test]
    fn test_clear_keeps_allocation() {
        let mut list = LightList::with_capacities(LightCapacities::default());
        list.push_punctual(light(), 3);
        list.push_area(light(), 4);
        let capacity = list.punctual_lights.capacity();

        list.clear();
        assert!(list.punctual_lights().is_empty());
        assert!(list.area_cull_indices().is_empty());
        assert_eq!(list.punctual_lights.capacity(), capacity);
    }

    #[test]
    fn test_room_tracks_capacity() {
        let mut list = LightList::with_capacities(LightCapacities {
            max_area_lights: 1,
            ..Default::default()
        });
        assert!(list.has_area_room());
        list.push_area(light(), 0);
        assert!(!list.has_area_room());
        assert_eq!(list.area_lights().len(), list.area_cull_indices().len());
        assert_eq!(list.finite_light_count(), 1);
    }

    #[test]
    fn test_allocates_full_capacity_once() {
        let mut list = LightList::with_capacities(LightCapacities::default());
        let mut commands = CommandList::new();
        list.ensure_allocated(&mut commands).unwrap();
        list.ensure_allocated(&mut commands).unwrap();
        assert_eq!(commands.len(), 4);
        assert_eq!(
            commands.commands()[1],
            Command::AllocateBuffer {
                buffer: GlobalBuffer::PunctualLights,
                size: 512 * 112,
            }
        );
    }

    #[test]
    fn test_upload_writes_each_category() {
        let mut list = LightList::with_capacities(LightCapacities::default());
        list.push_punctual(light(), 0);
        list.push_punctual(light(), 1);

        let mut commands = CommandList::new();
        list.upload(&mut commands);
        assert_eq!(commands.len(), 4);
        assert_eq!(
            commands.last_upload(GlobalBuffer::PunctualLights).map(<[u8]>::len),
            Some(2 * 112)
        );
        assert_eq!(
            commands.last_upload(GlobalBuffer::EnvLights).map(<[u8]>::len),
            Some(0)
        );
    }
}

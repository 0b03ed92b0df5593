//! Draw-stream wire format (spec §6, compatibility-relevant, exact).
//!
//! A draw stream is a flat `Vec<u32>`: one bitmask word per draw, followed
//! by the payload words for whichever of the 13 defined bits are set, then
//! repeated for the next draw. Every field is "sticky" — a draw that
//! doesn't set a bit reuses whatever value the last draw that did set it
//! left behind, so a sequence of draws that only change, say, the dynamic
//! offset only pays for one word per draw instead of re-encoding the whole
//! state. Every payload word is a plain index (into a resource pool) or a
//! plain count, never a raw driver handle — the stream is meant to survive
//! being generated on one frame and replayed on another, and pool indices
//! are stable across a resource's lifetime in a way `vk::Pipeline` values
//! bound to a specific driver session are not.
//!
//! `DrawStreamBuilder` produces the stream; [`replay_draw_stream`] consumes
//! it against a [`RenderEncoder`], reconstructing the sticky state as it
//! goes. This is the one format in the core with an explicit wire
//! specification — everything else is in-memory structs.

use crate::bind_group::BindGroup;
use crate::buffer::Buffer;
use crate::device::Device;
use crate::encoder::RenderEncoder;
use crate::handle::Handle;
use crate::shader::Shader;

const BIT_SHADER: u32 = 1 << 0;
const BIT_DYNAMIC_OFFSET: u32 = 1 << 1;
const BIT_DYNAMIC_BUFFER: u32 = 1 << 2;
const BIT_BIND_GROUP_2: u32 = 1 << 3;
const BIT_BIND_GROUP_1: u32 = 1 << 4;
const BIT_BIND_GROUP_0: u32 = 1 << 5;
const BIT_INDEX_OFFSET: u32 = 1 << 6;
const BIT_VERTEX_OFFSET: u32 = 1 << 7;
const BIT_INDEX_BUFFER: u32 = 1 << 8;
const BIT_VERTEX_BUFFER: u32 = 1 << 9;
const BIT_TRIANGLES: u32 = 1 << 10;
const BIT_INSTANCE_START: u32 = 1 << 11;
const BIT_INSTANCE_COUNT: u32 = 1 << 12;

/// `INDEX_BUFFER == NOT_INDEXED` means the draw is a plain (non-indexed) draw.
pub const NOT_INDEXED: u32 = u32::MAX;
const UNSET: u32 = u32::MAX;
/// Reset baseline for `index_buffer`: distinct from [`NOT_INDEXED`] so the
/// very first draw in a stream always re-encodes its index-buffer bit, even
/// if that first draw happens to be non-indexed.
const INDEX_BUFFER_RESET: u32 = u32::MAX - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawState {
    pub shader: u32,
    pub dynamic_offset: u32,
    pub dynamic_buffer: u32,
    pub bind_group_0: u32,
    pub bind_group_1: u32,
    pub bind_group_2: u32,
    pub index_offset: u32,
    pub vertex_offset: u32,
    pub index_buffer: u32,
    pub vertex_buffer: u32,
    pub triangle_count: u32,
    pub instance_start: u32,
    pub instance_count: u32,
}

impl Default for DrawState {
    /// Matches the reset baseline of the format this was ported from: every
    /// field starts "never set" (`UNSET`), except `index_buffer`, which gets
    /// its own reset sentinel distinct from the runtime "non-indexed"
    /// sentinel, and `dynamic_offset`, which starts at zero.
    fn default() -> DrawState {
        DrawState {
            shader: UNSET,
            dynamic_offset: 0,
            dynamic_buffer: UNSET,
            bind_group_0: UNSET,
            bind_group_1: UNSET,
            bind_group_2: UNSET,
            index_offset: UNSET,
            vertex_offset: UNSET,
            index_buffer: INDEX_BUFFER_RESET,
            vertex_buffer: UNSET,
            triangle_count: UNSET,
            instance_start: UNSET,
            instance_count: UNSET,
        }
    }
}

/// Accumulates draw calls against a previous [`DrawState`], emitting only
/// the fields that changed, and serializes the result into `words`.
pub struct DrawStreamBuilder {
    words: Vec<u32>,
    previous: DrawState,
}

impl Default for DrawStreamBuilder {
    fn default() -> DrawStreamBuilder {
        DrawStreamBuilder { words: Vec::new(), previous: DrawState::default() }
    }
}

impl DrawStreamBuilder {
    pub fn new() -> DrawStreamBuilder {
        DrawStreamBuilder::default()
    }

    /// Encodes one draw, diffing against whatever state the stream carried
    /// after the previous draw (or the reset baseline for the first draw).
    pub fn push_draw(&mut self, state: &DrawState) {
        let prev = self.previous;
        let mut mask = 0u32;

        if state.shader != prev.shader {
            mask |= BIT_SHADER;
        }
        if state.dynamic_offset != prev.dynamic_offset {
            mask |= BIT_DYNAMIC_OFFSET;
        }
        if state.dynamic_buffer != prev.dynamic_buffer {
            mask |= BIT_DYNAMIC_BUFFER;
        }
        if state.bind_group_2 != prev.bind_group_2 {
            mask |= BIT_BIND_GROUP_2;
        }
        if state.bind_group_1 != prev.bind_group_1 {
            mask |= BIT_BIND_GROUP_1;
        }
        if state.bind_group_0 != prev.bind_group_0 {
            mask |= BIT_BIND_GROUP_0;
        }
        if state.index_offset != prev.index_offset {
            mask |= BIT_INDEX_OFFSET;
        }
        if state.vertex_offset != prev.vertex_offset {
            mask |= BIT_VERTEX_OFFSET;
        }
        if state.index_buffer != prev.index_buffer {
            mask |= BIT_INDEX_BUFFER;
        }
        if state.vertex_buffer != prev.vertex_buffer {
            mask |= BIT_VERTEX_BUFFER;
        }
        if state.triangle_count != prev.triangle_count {
            mask |= BIT_TRIANGLES;
        }
        if state.instance_start != prev.instance_start {
            mask |= BIT_INSTANCE_START;
        }
        if state.instance_count != prev.instance_count {
            mask |= BIT_INSTANCE_COUNT;
        }

        self.words.push(mask);
        if mask & BIT_SHADER != 0 {
            self.words.push(state.shader);
        }
        if mask & BIT_DYNAMIC_OFFSET != 0 {
            self.words.push(state.dynamic_offset);
        }
        if mask & BIT_DYNAMIC_BUFFER != 0 {
            self.words.push(state.dynamic_buffer);
        }
        if mask & BIT_BIND_GROUP_2 != 0 {
            self.words.push(state.bind_group_2);
        }
        if mask & BIT_BIND_GROUP_1 != 0 {
            self.words.push(state.bind_group_1);
        }
        if mask & BIT_BIND_GROUP_0 != 0 {
            self.words.push(state.bind_group_0);
        }
        if mask & BIT_INDEX_OFFSET != 0 {
            self.words.push(state.index_offset);
        }
        if mask & BIT_VERTEX_OFFSET != 0 {
            self.words.push(state.vertex_offset);
        }
        if mask & BIT_INDEX_BUFFER != 0 {
            self.words.push(state.index_buffer);
        }
        if mask & BIT_VERTEX_BUFFER != 0 {
            self.words.push(state.vertex_buffer);
        }
        if mask & BIT_TRIANGLES != 0 {
            self.words.push(state.triangle_count);
        }
        if mask & BIT_INSTANCE_START != 0 {
            self.words.push(state.instance_start);
        }
        if mask & BIT_INSTANCE_COUNT != 0 {
            self.words.push(state.instance_count);
        }

        self.previous = *state;
    }

    pub fn into_words(self) -> Vec<u32> {
        self.words
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

struct WordReader<'a> {
    words: &'a [u32],
    cursor: usize,
}

impl<'a> WordReader<'a> {
    fn next(&mut self) -> u32 {
        let w = self.words[self.cursor];
        self.cursor += 1;
        w
    }

    fn has_more(&self) -> bool {
        self.cursor < self.words.len()
    }
}

/// Replays `words` against `encoder`, resolving every index field through
/// `device`'s pools and issuing exactly the bind/draw calls the recorded
/// stream describes (spec §6). Resolution is by pool index alone, not by
/// full (index, generation) handle — a draw stream is a same-frame
/// performance path and never outlives the resources it names, so the
/// generation check `Handle` normally carries is deliberately skipped here.
/// Assumes `words` was produced by [`DrawStreamBuilder`] against the same
/// bitmask layout.
pub fn replay_draw_stream(words: &[u32], device: &Device, encoder: &mut RenderEncoder<'_>) {
    let mut reader = WordReader { words, cursor: 0 };
    let mut state = DrawState::default();

    while reader.has_more() {
        let mask = reader.next();

        if mask & BIT_SHADER != 0 {
            state.shader = reader.next();
            if let Some(shader) = device.shaders.resolve_hot_by_index(state.shader) {
                encoder.bind_pipeline(shader.pipeline);
            }
        }
        if mask & BIT_DYNAMIC_OFFSET != 0 {
            state.dynamic_offset = reader.next();
        }
        if mask & BIT_DYNAMIC_BUFFER != 0 {
            state.dynamic_buffer = reader.next();
        }
        if mask & BIT_BIND_GROUP_2 != 0 {
            state.bind_group_2 = reader.next();
        }
        if mask & BIT_BIND_GROUP_1 != 0 {
            state.bind_group_1 = reader.next();
        }
        if mask & BIT_BIND_GROUP_0 != 0 {
            state.bind_group_0 = reader.next();
        }
        if mask & BIT_INDEX_OFFSET != 0 {
            state.index_offset = reader.next();
        }
        if mask & BIT_VERTEX_OFFSET != 0 {
            state.vertex_offset = reader.next();
        }
        if mask & BIT_INDEX_BUFFER != 0 {
            state.index_buffer = reader.next();
        }
        if mask & BIT_VERTEX_BUFFER != 0 {
            state.vertex_buffer = reader.next();
            if let Some(buffer) = device.buffers.resolve_hot_by_index(state.vertex_buffer) {
                encoder.bind_vertex_buffer(0, buffer.raw, 0);
            }
        }
        if mask & BIT_TRIANGLES != 0 {
            state.triangle_count = reader.next();
        }
        if mask & BIT_INSTANCE_START != 0 {
            state.instance_start = reader.next();
        }
        if mask & BIT_INSTANCE_COUNT != 0 {
            state.instance_count = reader.next();
        }

        for (slot, index) in [
            (0u32, state.bind_group_0),
            (1u32, state.bind_group_1),
            (2u32, state.bind_group_2),
        ] {
            if index == UNSET {
                continue;
            }
            if mask & (BIT_BIND_GROUP_0 >> slot) != 0 || mask & BIT_DYNAMIC_OFFSET != 0 {
                if let Some(shader) = device.shaders.resolve_hot_by_index(state.shader) {
                    if let Some(bind_group) = device.bind_groups.resolve_hot_by_index(index) {
                        let offsets: &[u32] =
                            if state.dynamic_buffer == slot { &[state.dynamic_offset] } else { &[] };
                        encoder.bind_descriptor_set(shader.pipeline_layout, slot, bind_group.raw, offsets);
                    }
                }
            }
        }

        if state.index_buffer != NOT_INDEXED && mask & BIT_INDEX_BUFFER != 0 {
            if let Some(buffer) = device.buffers.resolve_hot_by_index(state.index_buffer) {
                encoder.bind_index_buffer(buffer.raw, 0, ash::vk::IndexType::UINT32);
            }
        }

        if state.index_buffer == NOT_INDEXED {
            encoder.draw(state.triangle_count, state.instance_count.max(1), state.vertex_offset, state.instance_start);
        } else {
            encoder.draw_indexed(
                state.triangle_count,
                state.instance_count.max(1),
                state.index_offset,
                state.vertex_offset as i32,
                state.instance_start,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_layout_matches_exact_wire_specification() {
        assert_eq!(BIT_SHADER, 1 << 0);
        assert_eq!(BIT_DYNAMIC_OFFSET, 1 << 1);
        assert_eq!(BIT_DYNAMIC_BUFFER, 1 << 2);
        assert_eq!(BIT_BIND_GROUP_2, 1 << 3);
        assert_eq!(BIT_BIND_GROUP_1, 1 << 4);
        assert_eq!(BIT_BIND_GROUP_0, 1 << 5);
        assert_eq!(BIT_INDEX_OFFSET, 1 << 6);
        assert_eq!(BIT_VERTEX_OFFSET, 1 << 7);
        assert_eq!(BIT_INDEX_BUFFER, 1 << 8);
        assert_eq!(BIT_VERTEX_BUFFER, 1 << 9);
        assert_eq!(BIT_TRIANGLES, 1 << 10);
        assert_eq!(BIT_INSTANCE_START, 1 << 11);
        assert_eq!(BIT_INSTANCE_COUNT, 1 << 12);
    }

    #[test]
    fn first_draw_always_sets_index_buffer_bit_even_when_non_indexed() {
        let mut builder = DrawStreamBuilder::new();
        let state = DrawState { index_buffer: NOT_INDEXED, triangle_count: 3, instance_count: 1, ..DrawState::default() };
        builder.push_draw(&state);
        let words = builder.into_words();
        assert_eq!(words[0] & BIT_INDEX_BUFFER, BIT_INDEX_BUFFER);
    }

    #[test]
    fn sticky_fields_are_not_reencoded() {
        let mut builder = DrawStreamBuilder::new();
        let mut state = DrawState { shader: 1, triangle_count: 3, instance_count: 1, ..DrawState::default() };
        builder.push_draw(&state);
        // Second draw changes nothing but the triangle count.
        state.triangle_count = 6;
        builder.push_draw(&state);

        let words = builder.into_words();
        let mut reader = WordReader { words: &words, cursor: 0 };
        let first_mask = reader.next();
        assert_eq!(first_mask & BIT_SHADER, BIT_SHADER);

        // Skip the first draw's payload words in fixed-order: shader is the
        // only bit besides index_buffer(reset) and triangles set on draw 1.
        reader.next(); // shader index
        reader.next(); // index_buffer (reset baseline always re-encodes once)
        reader.next(); // triangle_count

        let second_mask = reader.next();
        assert_eq!(second_mask & BIT_SHADER, 0, "shader is sticky, should not re-encode");
        assert_eq!(second_mask & BIT_TRIANGLES, BIT_TRIANGLES);
    }

    #[test]
    fn indexed_draw_sets_index_buffer_to_a_real_index() {
        let mut builder = DrawStreamBuilder::new();
        let state = DrawState { index_buffer: 4, triangle_count: 36, instance_count: 1, ..DrawState::default() };
        builder.push_draw(&state);
        let words = builder.into_words();
        assert_eq!(words[0] & BIT_INDEX_BUFFER, BIT_INDEX_BUFFER);
        assert_ne!(words[1 + (words[0] & BIT_SHADER != 0) as usize], NOT_INDEXED);
    }
}

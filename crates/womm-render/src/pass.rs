// SPDX-License-Identifier: CEPL-1.0
//! Backend-neutral description of the two fixed render passes.
//!
//! The world pass clears color and depth and leaves the color image in
//! attachment layout; the UI pass loads that image, draws on top and hands
//! it to presentation.

use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ClearFlags: u8 {
        const COLOR = 1;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOp {
    Clear,
    Load,
    DontCare,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreOp {
    Store,
    DontCare,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    Undefined,
    ColorAttachment,
    DepthStencilAttachment,
    PresentSrc,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachmentSpec {
    pub load: LoadOp,
    pub store: StoreOp,
    pub initial: Layout,
    pub final_layout: Layout,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PassDesc {
    pub clear: ClearFlags,
    pub clear_color: [f32; 4],
    pub depth: f32,
    pub stencil: u32,
    /// An earlier pass already wrote the color image this frame.
    pub prev_pass: bool,
    /// This pass finishes the frame and the image goes to present.
    pub next_pass: bool,
}

impl PassDesc {
    pub fn world(clear_color: [f32; 4]) -> Self {
        Self {
            clear: ClearFlags::COLOR | ClearFlags::DEPTH,
            clear_color,
            depth: 1.0,
            stencil: 0,
            prev_pass: false,
            next_pass: false,
        }
    }

    pub fn ui() -> Self {
        Self {
            clear: ClearFlags::empty(),
            clear_color: [0.0; 4],
            depth: 1.0,
            stencil: 0,
            prev_pass: true,
            next_pass: true,
        }
    }

    /// A depth attachment is only attached to passes that clear depth.
    pub fn has_depth(&self) -> bool {
        self.clear.contains(ClearFlags::DEPTH)
    }

    pub fn color_attachment(&self) -> AttachmentSpec {
        AttachmentSpec {
            load: if self.clear.contains(ClearFlags::COLOR) {
                LoadOp::Clear
            } else {
                LoadOp::Load
            },
            store: StoreOp::Store,
            initial: if self.prev_pass {
                Layout::ColorAttachment
            } else {
                Layout::Undefined
            },
            final_layout: if self.next_pass {
                Layout::PresentSrc
            } else {
                Layout::ColorAttachment
            },
        }
    }

    pub fn depth_attachment(&self) -> Option<AttachmentSpec> {
        self.has_depth().then_some(AttachmentSpec {
            load: LoadOp::Clear,
            store: StoreOp::DontCare,
            initial: Layout::Undefined,
            final_layout: Layout::DepthStencilAttachment,
        })
    }

    /// Entries handed to `begin_render_pass`, color first.
    pub fn clear_value_count(&self) -> usize {
        let color = self.clear.contains(ClearFlags::COLOR) as usize;
        let depth = self.clear.intersects(ClearFlags::DEPTH | ClearFlags::STENCIL) as usize;
        color + depth
    }

    /// External-to-pass always; pass-to-external only when presenting.
    pub fn dependency_count(&self) -> usize {
        1 + self.next_pass as usize
    }
}

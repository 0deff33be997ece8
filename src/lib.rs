//! I420 video presentation: a double-buffered frame exchange between a
//! decoder thread and a wgpu renderer that converts YUV to RGB on the GPU
//! and letterboxes the picture into the window.

pub mod app;
pub mod config;

pub mod frame {
    pub mod exchange;
    pub mod planar_buffer;
}

pub mod graphics {
    pub mod graphics_context;
    pub mod pipeline;
    pub mod projection;
    pub mod renderer;
    pub mod texture_set;
}

pub mod producer;
pub mod redraw;

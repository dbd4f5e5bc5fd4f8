// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;
mod scene;

use anyhow::Result;
use clap::Parser;
use config::AppCfg;
use scene::Scene;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use womm_core::{init_tracing, Arena, MemTracker};
use womm_render::texture::load_or_default;
use womm_render::{FrameStatus, RenderSize, Renderer};
use womm_render_vk::RenderSystem;

use womm_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file
    #[arg(long, default_value = "womm.toml")]
    config: PathBuf,
    /// Asset root (shaders/, textures)
    #[arg(long)]
    assets: Option<PathBuf>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
}

struct App {
    cfg: AppCfg,
    arena: Arena,
    heap: Arc<MemTracker>,
    window: Option<Window>,
    renderer: Option<RenderSystem>,
    scene: Option<Scene>,
    render_size: RenderSize,

    exiting: bool,
    paused: bool,
    frames: u32,
    last_fps_instant: Instant,
    last_frame: Instant,
}

impl App {
    fn init_graphics(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = event_loop.create_window(self.cfg.window.attributes())?;
        let (width, height) = womm_platform::inner_size(&window);
        self.render_size = RenderSize { width, height };

        let mut renderer = RenderSystem::new(
            &mut self.arena,
            Arc::clone(&self.heap),
            &window,
            &window,
            self.render_size,
            &self.cfg.render,
        )?;
        if let Some(path) = self.cfg.render.texture_path() {
            renderer.set_diffuse_texture(&load_or_default(path))?;
        }
        let scene = Scene::load(&mut renderer)?;

        info!("{}", renderer.vram_status());
        info!("{}", self.heap.report());
        info!(
            "arena: {} of {} bytes used",
            self.arena.used(),
            self.arena.total_size()
        );

        self.paused = self.render_size.is_zero();
        self.window = Some(window);
        self.renderer = Some(renderer);
        self.scene = Some(scene);
        Ok(())
    }

    /// Renderer goes before the window it draws into.
    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        self.scene = None;
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn redraw(&mut self) -> Result<()> {
        let (Some(renderer), Some(scene)) = (&mut self.renderer, &mut self.scene) else {
            return Ok(());
        };
        let now = Instant::now();
        let delta = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;

        let aspect = self.render_size.width as f32 / self.render_size.height.max(1) as f32;
        let bundle = scene.frame(delta, aspect)?;
        if renderer.draw(&bundle)? == FrameStatus::Presented {
            self.frames = self.frames.saturating_add(1);
        }
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init_graphics(event_loop) {
                error!("renderer init failed: {e:#}");
                self.shutdown(event_loop);
                return;
            }
        }
        event_loop.set_control_flow(ControlFlow::Wait);
        info!("resumed → paused={}", self.paused);
        if !self.paused {
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                };
                self.paused = self.render_size.is_zero();
                info!(
                    "Resized → {}x{} (paused={})",
                    self.render_size.width, self.render_size.height, self.paused
                );

                if let Some(renderer) = &mut self.renderer {
                    if let Err(e) = renderer.resize(self.render_size) {
                        error!("resize failed: {e:#}");
                        self.shutdown(event_loop);
                        return;
                    }
                }
                if !self.paused {
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }
                if let Err(e) = self.redraw() {
                    error!("render error: {e:#}");
                    self.shutdown(event_loop);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if self.paused {
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        // FIFO present paces the loop
        event_loop.set_control_flow(ControlFlow::Wait);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let mut cfg = AppCfg::load(&args.config);
    cfg.apply_overrides(args.assets, args.width, args.height);

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let now = Instant::now();
    let mut app = App {
        arena: Arena::new(cfg.memory.arena_bytes()),
        cfg,
        heap: Arc::new(MemTracker::new()),
        window: None,
        renderer: None,
        scene: None,
        render_size: RenderSize {
            width: 1,
            height: 1,
        },
        exiting: false,
        paused: false,
        frames: 0,
        last_fps_instant: now,
        last_frame: now,
    };

    event_loop.run_app(&mut app)?;

    app.renderer = None;
    app.heap.log_leaks();
    Ok(())
}

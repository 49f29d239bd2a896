///
/// Enable debug logging: RUST_LOG=debug
///

mod app;
mod assets;

use anyhow::{bail, Context, Result};
use app::{App, CullMode, MeshData, RendererConfig, RendererError};
use assets::ObjScene;
use clap::Parser;
use log::*;
use nalgebra_glm as glm;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use vulkanalia::vk;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, Event, KeyboardInput, VirtualKeyCode, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::window::WindowBuilder;

const SHADER_DIR: &str = "shaders";
const TEXTURE_DIR: &str = "textures";

#[derive(clap::Parser, Clone, Debug, Default, PartialEq)]
#[command(about = "Two-subpass Vulkan renderer", long_about = None)]
struct Options {
    /// OBJ scene to draw instead of the two demo quads.
    model: Option<PathBuf>,

    /// Read every uploaded mesh back and compare it with the source data.
    #[arg(long)]
    verify_uploads: bool,

    /// Disable back-face culling.
    #[arg(long)]
    double_sided: bool,

    /// Enable the validation layer in release builds too.
    #[arg(long)]
    validate: bool,
}

/// OBJ scenes get one texture slot per material on top of the default texture.
fn renderer_config(options: &Options, scene: Option<&ObjScene>) -> RendererConfig {
    let cull_mode = if options.double_sided { CullMode::None } else { CullMode::Back };
    let config = RendererConfig::default()
        .with_cull_mode(cull_mode)
        .with_validation(options.validate || cfg!(debug_assertions));

    match scene {
        Some(scene) => {
            let needed = scene.material_textures.len() as u32 + 1;
            let max_textures = config.max_textures.max(needed);
            config.with_max_textures(max_textures)
        }
        None => config,
    }
}

fn load_shader(name: &str) -> Result<Vec<u8>> {
    let path = Path::new(SHADER_DIR).join(format!("{}.spv", name));
    fs::read(&path).with_context(|| format!("Failed to read shader {}", path.display()))
}

unsafe fn verify_upload(app: &mut App, model: usize, meshes: &[MeshData]) -> Result<()> {
    for (index, mesh) in meshes.iter().enumerate() {
        let (vertices, indices) = app.read_back_mesh(model, index)?;
        if vertices != mesh.vertex_bytes() || indices != mesh.index_bytes() {
            bail!("Mesh {} of model {} differs after upload.", index, model);
        }
    }
    info!("Model {} read back intact ({} meshes).", model, meshes.len());
    Ok(())
}

unsafe fn load_obj_scene(app: &mut App, scene: &ObjScene, options: &Options) -> Result<Vec<usize>> {
    let mut material_to_texture = Vec::with_capacity(scene.material_textures.len());
    for texture in &scene.material_textures {
        let id = match texture {
            Some(name) => match assets::decode_png(&Path::new(TEXTURE_DIR).join(name)) {
                Ok(pixels) => app.load_texture(&pixels.rgba, pixels.width, pixels.height, pixels.byte_size())?,
                Err(e) => {
                    warn!("Using default texture for `{}`: {:#}", name, e);
                    0
                }
            },
            None => 0,
        };
        material_to_texture.push(id);
    }

    let model = app.load_model(&scene.meshes, &material_to_texture)?;
    if options.verify_uploads {
        verify_upload(app, model, &scene.meshes)?;
    }

    Ok(vec![model])
}

unsafe fn load_quads(app: &mut App, options: &Options) -> Result<Vec<usize>> {
    let board = assets::checkerboard(64);
    let checker = app.load_texture(&board.rgba, board.width, board.height, board.byte_size())?;

    let textured = [assets::quad(glm::vec4(1.0, 0.8, 0.8, 1.0))];
    let plain = [assets::quad(glm::vec4(0.2, 0.4, 1.0, 1.0))];

    let first = app.load_model(&textured, &[checker])?;
    let second = app.load_model(&plain, &[])?;

    if options.verify_uploads {
        verify_upload(app, first, &textured)?;
        verify_upload(app, second, &plain)?;
    }

    Ok(vec![first, second])
}

/// Spins each model about (1, 1, 1) at its own rate.
fn animate(app: &mut App, models: &[usize], angle: f32) -> Result<()> {
    let placements = [(glm::vec3(-2.0, 1.0, -5.0), 1.0), (glm::vec3(2.0, -1.0, -5.0), -25.0)];

    for (model, (offset, rate)) in models.iter().zip(placements) {
        let transform = glm::translate(&glm::Mat4::identity(), &offset);
        let transform = glm::rotate(&transform, (angle * rate).to_radians(), &glm::vec3(1.0, 1.0, 1.0));
        app.update_model_transform(*model, transform)?;
    }

    Ok(())
}

fn main() -> Result<()> {
    pretty_env_logger::init();
    info!("Creating app...");

    let options = Options::parse();
    let scene = options.model.as_deref().map(assets::load_obj).transpose()?;
    let config = renderer_config(&options, scene.as_ref());
    let mut camera = config.camera;

    let event_loop = EventLoop::new();
    let window = WindowBuilder::new()
        .with_title("Vulkan Render")
        .with_inner_size(LogicalSize::new(1280, 720))
        .with_resizable(false)
        .build(&event_loop)?;

    let mut app = unsafe { App::create(&window, config, &load_shader)? };

    let models = unsafe {
        match &scene {
            Some(scene) => load_obj_scene(&mut app, scene, &options)?,
            None => load_quads(&mut app, &options)?,
        }
    };

    let mut destroying = false;
    let mut angle = 0.0f32;
    let mut last = Instant::now();

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Poll;
        match event {
            Event::MainEventsCleared if !destroying => {
                let now = Instant::now();
                angle = (angle + 10.0 * (now - last).as_secs_f32()) % 360.0;
                last = now;

                let result = animate(&mut app, &models, angle).and_then(|_| unsafe { app.render() });
                if let Err(e) = result {
                    let kind = e.downcast_ref::<RendererError>().map(|e| e.kind());
                    error!("Rendering stopped ({:?}): {:#}", kind, e);
                    destroying = true;
                    unsafe { app.destroy() };
                    *control_flow = ControlFlow::ExitWithCode(1);
                }
            }

            Event::WindowEvent {
                event:
                    WindowEvent::KeyboardInput {
                        input: KeyboardInput { state: ElementState::Pressed, virtual_keycode: Some(key), .. },
                        ..
                    },
                ..
            } if !destroying => {
                let step = match key {
                    VirtualKeyCode::Up => -0.5,
                    VirtualKeyCode::Down => 0.5,
                    _ => return,
                };
                camera.eye.z = (camera.eye.z + step).clamp(0.5, 20.0);

                let size = window.inner_size();
                let extent = vk::Extent2D { width: size.width, height: size.height };
                let view = glm::look_at(&camera.eye, &camera.target, &camera.up);
                if let Err(e) = app.update_camera(view, app::projection(&camera, extent)) {
                    warn!("{:#}", e);
                }
            }

            Event::WindowEvent { event: WindowEvent::CloseRequested, .. } => {
                destroying = true;
                *control_flow = ControlFlow::Exit;
                unsafe { app.destroy() };
                info!("Presented {} frames, {:?} left.", app.frames_presented(), app.resource_counters());
            }

            _ => {}
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Options, clap::Error> {
        Options::try_parse_from(std::iter::once("subpass-renderer").chain(args.iter().copied()))
    }

    #[test]
    fn no_arguments_draw_the_quads() {
        assert_eq!(parse(&[]).unwrap(), Options::default());
    }

    #[test]
    fn flag_and_model_in_any_order() {
        let expected = Options { model: Some(PathBuf::from("room.obj")), verify_uploads: true, ..Default::default() };
        assert_eq!(parse(&["--verify-uploads", "room.obj"]).unwrap(), expected);
        assert_eq!(parse(&["room.obj", "--verify-uploads"]).unwrap(), expected);
    }

    #[test]
    fn misspelled_flag_is_rejected() {
        let error = parse(&["--validat"]).unwrap_err();
        assert_eq!(error.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    #[test]
    fn only_one_model_is_accepted() {
        assert!(parse(&["a.obj", "b.obj"]).is_err());
    }

    #[test]
    fn double_sided_disables_culling() {
        let options = parse(&["--double-sided"]).unwrap();
        assert_eq!(renderer_config(&options, None).cull_mode, CullMode::None);
        assert_eq!(renderer_config(&Options::default(), None).cull_mode, CullMode::Back);
    }

    #[test]
    fn large_scenes_raise_the_texture_limit() {
        let scene = ObjScene { meshes: Vec::new(), material_textures: vec![None; 30] };
        assert_eq!(renderer_config(&Options::default(), Some(&scene)).max_textures, 31);

        let small = ObjScene { meshes: Vec::new(), material_textures: vec![None; 2] };
        assert_eq!(renderer_config(&Options::default(), Some(&small)).max_textures, 20);
    }

    #[test]
    fn shaders_are_read_from_spv_files() {
        let error = load_shader("missing.stage").unwrap_err();
        assert!(format!("{:#}", error).contains("missing.stage.spv"));
    }
}

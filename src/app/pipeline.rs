use super::app_data;
use super::config::CullMode;
use super::error::RendererError;
use super::mesh::Vertex;
use super::render_pass;

use anyhow::Result;
use log::*;
use nalgebra_glm as glm;
use std::mem::size_of;
use vulkanalia::prelude::v1_0::*;

pub const GEOMETRY_VERTEX_SHADER: &str = "geometry.vert";
pub const GEOMETRY_FRAGMENT_SHADER: &str = "geometry.frag";
pub const COMPOSITE_VERTEX_SHADER: &str = "composite.vert";
pub const COMPOSITE_FRAGMENT_SHADER: &str = "composite.frag";

const ENTRY_POINT: &[u8] = b"main\0";

/// Supplies precompiled SPIR-V by logical stage name.
pub trait ShaderSource {
    fn load(&self, name: &str) -> Result<Vec<u8>>;
}

impl<F> ShaderSource for F
where
    F: Fn(&str) -> Result<Vec<u8>>,
{
    fn load(&self, name: &str) -> Result<Vec<u8>> {
        self(name)
    }
}

pub fn spirv_words(name: &str, bytecode: &[u8]) -> Result<Vec<u32>> {
    if bytecode.is_empty() || bytecode.len() % 4 != 0 {
        return Err(RendererError::InvalidShader {
            name: name.to_string(),
            reason: format!("length {} is not a non-zero multiple of 4", bytecode.len()),
        }
        .into());
    }

    Ok(bytecode
        .chunks_exact(4)
        .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

unsafe fn create_shader_module(device: &Device, shaders: &impl ShaderSource, name: &str) -> Result<vk::ShaderModule> {
    let bytecode = shaders.load(name)?;
    let words = spirv_words(name, &bytecode)?;

    let info = vk::ShaderModuleCreateInfo::builder()
        .code_size(bytecode.len())
        .code(&words);

    let module = device.create_shader_module(&info, None)?;
    trace!("Created shader module `{}` ({} bytes).", name, bytecode.len());

    Ok(module)
}

/// Vertex and fragment modules, destroyed once the pipeline exists.
struct ShaderPair {
    vertex: vk::ShaderModule,
    fragment: vk::ShaderModule,
}

impl ShaderPair {
    unsafe fn load(device: &Device, shaders: &impl ShaderSource, vertex: &str, fragment: &str) -> Result<Self> {
        let vertex = create_shader_module(device, shaders, vertex)?;
        let fragment = match create_shader_module(device, shaders, fragment) {
            Ok(module) => module,
            Err(e) => {
                device.destroy_shader_module(vertex, None);
                return Err(e);
            }
        };
        Ok(Self { vertex, fragment })
    }

    unsafe fn destroy(self, device: &Device) {
        device.destroy_shader_module(self.vertex, None);
        device.destroy_shader_module(self.fragment, None);
    }
}

/// The per-model transform travels as a push constant.
pub fn model_push_constant_range() -> vk::PushConstantRange {
    vk::PushConstantRange::builder()
        .stage_flags(vk::ShaderStageFlags::VERTEX)
        .offset(0)
        .size(size_of::<glm::Mat4>() as u32)
        .build()
}

pub fn rasterization_state(cull_mode: CullMode) -> vk::PipelineRasterizationStateCreateInfo {
    vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(cull_mode.flags())
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(false)
        .build()
}

pub fn geometry_depth_state() -> vk::PipelineDepthStencilStateCreateInfo {
    vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(vk::CompareOp::LESS)
        .depth_bounds_test_enable(false)
        .min_depth_bounds(0.0)
        .max_depth_bounds(1.0)
        .stencil_test_enable(false)
        .build()
}

/// Depth is an input of the composite subpass and must stay untouched.
pub fn composite_depth_state() -> vk::PipelineDepthStencilStateCreateInfo {
    vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(false)
        .depth_write_enable(false)
        .depth_compare_op(vk::CompareOp::ALWAYS)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false)
        .build()
}

unsafe fn create_pipeline_layout(
    device: &Device,
    set_layouts: &[vk::DescriptorSetLayout],
    push_constant_ranges: &[vk::PushConstantRange],
) -> Result<vk::PipelineLayout> {
    let info = vk::PipelineLayoutCreateInfo::builder()
        .set_layouts(set_layouts)
        .push_constant_ranges(push_constant_ranges);

    Ok(device.create_pipeline_layout(&info, None)?)
}

/// Fixed-function state shared by both subpasses, ending in pipeline creation.
unsafe fn create_graphics_pipeline(
    device: &Device,
    data: &app_data::Data,
    shaders: &ShaderPair,
    vertex_input_state: &vk::PipelineVertexInputStateCreateInfo,
    rasterization_state: &vk::PipelineRasterizationStateCreateInfo,
    depth_stencil_state: &vk::PipelineDepthStencilStateCreateInfo,
    layout: vk::PipelineLayout,
    subpass: u32,
) -> Result<vk::Pipeline> {
    let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::VERTEX)
        .module(shaders.vertex)
        .name(ENTRY_POINT);

    let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::FRAGMENT)
        .module(shaders.fragment)
        .name(ENTRY_POINT);

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    let viewport = vk::Viewport::builder()
        .x(0.0)
        .y(0.0)
        .width(data.swapchain_extent.width as f32)
        .height(data.swapchain_extent.height as f32)
        .min_depth(0.0)
        .max_depth(1.0);

    let scissor = vk::Rect2D::builder()
        .offset(vk::Offset2D { x: 0, y: 0 })
        .extent(data.swapchain_extent);

    let viewports = &[viewport];
    let scissors = &[scissor];
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewports(viewports)
        .scissors(scissors);

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::_1);

    let attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::all())
        .blend_enable(false);

    let attachments = &[attachment];
    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .logic_op(vk::LogicOp::COPY)
        .attachments(attachments)
        .blend_constants([0.0, 0.0, 0.0, 0.0]);

    let stages = &[vert_stage, frag_stage];
    let info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(stages)
        .vertex_input_state(vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .layout(layout)
        .render_pass(data.render_pass)
        .subpass(subpass);

    Ok(device.create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)?.0[0])
}

pub unsafe fn create_geometry_pipeline(
    device: &Device,
    cull_mode: CullMode,
    shaders: &impl ShaderSource,
    data: &mut app_data::Data,
) -> Result<()> {
    let modules = ShaderPair::load(device, shaders, GEOMETRY_VERTEX_SHADER, GEOMETRY_FRAGMENT_SHADER)?;

    let binding_descriptions = &[Vertex::binding_description()];
    let attribute_descriptions = Vertex::attribute_descriptions();
    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(binding_descriptions)
        .vertex_attribute_descriptions(&attribute_descriptions)
        .build();

    let created = (|| -> Result<()> {
        // set 0 = view-projection, set 1 = texture
        let set_layouts = &[data.uniform_descriptors.layout, data.sampler_descriptors.layout];
        data.geometry_pipeline_layout = create_pipeline_layout(device, set_layouts, &[model_push_constant_range()])?;

        data.geometry_pipeline = create_graphics_pipeline(
            device,
            data,
            &modules,
            &vertex_input_state,
            &rasterization_state(cull_mode),
            &geometry_depth_state(),
            data.geometry_pipeline_layout,
            render_pass::GEOMETRY_SUBPASS,
        )?;
        Ok(())
    })();

    modules.destroy(device);
    created?;

    debug!("Created geometry pipeline (cull {:?}).", cull_mode);

    Ok(())
}

/// Full-screen triangle generated from the vertex index, so no vertex input.
pub unsafe fn create_composite_pipeline(
    device: &Device,
    shaders: &impl ShaderSource,
    data: &mut app_data::Data,
) -> Result<()> {
    let modules = ShaderPair::load(device, shaders, COMPOSITE_VERTEX_SHADER, COMPOSITE_FRAGMENT_SHADER)?;

    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::builder().build();

    let created = (|| -> Result<()> {
        let set_layouts = &[data.input_descriptors.layout];
        data.composite_pipeline_layout = create_pipeline_layout(device, set_layouts, &[])?;

        data.composite_pipeline = create_graphics_pipeline(
            device,
            data,
            &modules,
            &vertex_input_state,
            &rasterization_state(CullMode::None),
            &composite_depth_state(),
            data.composite_pipeline_layout,
            render_pass::COMPOSITE_SUBPASS,
        )?;
        Ok(())
    })();

    modules.destroy(device);
    created?;

    debug!("Created composite pipeline.");

    Ok(())
}

pub unsafe fn destroy(device: &Device, data: &mut app_data::Data) {
    device.destroy_pipeline(data.composite_pipeline, None);
    device.destroy_pipeline_layout(data.composite_pipeline_layout, None);
    device.destroy_pipeline(data.geometry_pipeline, None);
    device.destroy_pipeline_layout(data.geometry_pipeline_layout, None);
    data.composite_pipeline = vk::Pipeline::null();
    data.composite_pipeline_layout = vk::PipelineLayout::null();
    data.geometry_pipeline = vk::Pipeline::null();
    data.geometry_pipeline_layout = vk::PipelineLayout::null();
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::collections::HashMap;

    #[test]
    fn bytecode_is_read_as_native_words() {
        let bytes = [0x03, 0x02, 0x23, 0x07, 1, 0, 0, 0];
        let words = spirv_words("geometry.vert", &bytes).unwrap();
        assert_eq!(words.len(), 2);
        assert_eq!(words[0], u32::from_ne_bytes([0x03, 0x02, 0x23, 0x07]));
    }

    #[test]
    fn misaligned_or_empty_bytecode_is_rejected() {
        for bytes in [&[][..], &[1, 2, 3][..], &[1, 2, 3, 4, 5][..]] {
            let error = spirv_words("composite.frag", bytes).unwrap_err();
            assert!(matches!(
                error.downcast_ref::<RendererError>(),
                Some(RendererError::InvalidShader { name, .. }) if name == "composite.frag"
            ));
        }
    }

    #[test]
    fn closures_are_shader_sources() {
        let blobs = HashMap::from([(GEOMETRY_VERTEX_SHADER, vec![0u8; 8])]);
        let source = |name: &str| blobs.get(name).cloned().ok_or_else(|| anyhow!("missing {}", name));

        assert_eq!(source.load(GEOMETRY_VERTEX_SHADER).unwrap().len(), 8);
        assert!(source.load(COMPOSITE_FRAGMENT_SHADER).is_err());
    }

    #[test]
    fn transform_push_constant_is_one_matrix_for_vertex_stage() {
        let range = model_push_constant_range();
        assert_eq!(range.stage_flags, vk::ShaderStageFlags::VERTEX);
        assert_eq!(range.offset, 0);
        assert_eq!(range.size, 64);
    }

    #[test]
    fn composite_never_writes_depth() {
        let geometry = geometry_depth_state();
        assert_eq!(geometry.depth_test_enable, vk::TRUE);
        assert_eq!(geometry.depth_write_enable, vk::TRUE);
        assert_eq!(geometry.depth_compare_op, vk::CompareOp::LESS);

        let composite = composite_depth_state();
        assert_eq!(composite.depth_write_enable, vk::FALSE);
    }

    #[test]
    fn cull_mode_is_configurable() {
        assert_eq!(rasterization_state(CullMode::Back).cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(rasterization_state(CullMode::None).cull_mode, vk::CullModeFlags::NONE);
        assert_eq!(rasterization_state(CullMode::Back).front_face, vk::FrontFace::COUNTER_CLOCKWISE);
    }
}

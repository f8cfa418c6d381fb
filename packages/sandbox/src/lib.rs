// ABOUTME: Container runtime adapter for Botyard projects
// ABOUTME: Exposes the runtime trait, its Docker implementation and build context packaging

pub mod context;
pub mod providers;

pub use context::{build_context, Descriptor, ENTRYPOINT_CANDIDATES};
pub use providers::{
    container_name, image_tag, BuildSpec, ContainerPresence, ContainerRuntime, DockerRuntime,
    DockerRuntimeOptions, ImageRef, ManagedContainer, OutputChunk, OutputStream, RunOutcome,
    RunSpec, RuntimeError, StreamType, LABEL_MANAGED, LABEL_PROJECT_ID,
};

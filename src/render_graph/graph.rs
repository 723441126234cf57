//! Render graph definition and compilation

use std::collections::{BTreeSet, HashSet};

use crate::engine::{RendererError, RendererResult};
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;

/// The main render graph structure
pub struct RenderGraph {
    passes: Vec<Box<dyn RenderPass>>,
    pass_nodes: Vec<PassNode>,
    resources: Vec<VirtualResource>,
    next_pass_id: u32,
    next_resource_id: u32,
}

impl RenderGraph {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            pass_nodes: Vec::new(),
            resources: Vec::new(),
            next_pass_id: 0,
            next_resource_id: 0,
        }
    }

    /// Register an external resource (swapchain image, G-buffer attachment, scene buffer)
    pub fn import(&mut self, name: &str) -> ResourceId {
        if let Some(id) = self.resource_id(name) {
            return id;
        }
        let id = ResourceId(self.next_resource_id);
        self.next_resource_id += 1;
        self.resources.push(VirtualResource::External {
            id,
            name: name.to_string(),
        });
        id
    }

    /// Look up any resource by name
    pub fn resource_id(&self, name: &str) -> Option<ResourceId> {
        self.resources
            .iter()
            .find(|r| r.name() == name)
            .map(VirtualResource::id)
    }

    /// Add a render pass to the graph
    pub fn add_pass<P: RenderPass + 'static>(&mut self, pass: P) -> RendererResult<PassId> {
        let id = PassId(self.next_pass_id);
        self.next_pass_id += 1;

        let mut boxed_pass = Box::new(pass);

        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        {
            let mut ctx = PassSetupContext {
                resources: &mut self.resources,
                inputs: &mut inputs,
                outputs: &mut outputs,
                next_resource_id: &mut self.next_resource_id,
            };
            boxed_pass.setup(&mut ctx)?;
        }

        log::debug!(
            "Render graph: added pass '{}' ({} reads, {} writes)",
            boxed_pass.name(),
            inputs.len(),
            outputs.len()
        );

        self.pass_nodes.push(PassNode {
            id,
            name: boxed_pass.name().to_string(),
            pass_type: boxed_pass.pass_type(),
            inputs,
            outputs,
        });
        self.passes.push(boxed_pass);

        Ok(id)
    }

    /// Order passes by their resource hazards.
    ///
    /// A pass that only reads a resource runs after every pass writing it, wherever either was
    /// declared: a read always sees this frame's contents, so a reader declared before a writer
    /// is moved behind it and no write-after-read edge is ever created. Passes writing the same
    /// resource keep their declaration order. Among passes that are ready at the same time the
    /// one declared first runs first, so the result is deterministic.
    pub fn compile(&self) -> RendererResult<CompiledGraph> {
        let count = self.pass_nodes.len();
        let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); count];

        for (a, first) in self.pass_nodes.iter().enumerate() {
            for (b, second) in self.pass_nodes.iter().enumerate().skip(a + 1) {
                for resource in self.resources.iter().map(VirtualResource::id) {
                    let a_writes = first.writes_resource(resource);
                    let b_writes = second.writes_resource(resource);
                    let a_reads = first.reads_resource(resource);
                    let b_reads = second.reads_resource(resource);

                    if a_writes && (b_writes || b_reads) {
                        successors[a].insert(b);
                    } else if b_writes && a_reads {
                        // Declaration order is overridden: `first` reads what `second` writes
                        successors[b].insert(a);
                    }
                }
            }
        }

        let mut in_degree = vec![0usize; count];
        for targets in &successors {
            for &t in targets {
                in_degree[t] += 1;
            }
        }

        let mut ready: BTreeSet<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(count);

        while let Some(index) = ready.pop_first() {
            order.push(index);
            for &next in &successors[index] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() != count {
            let scheduled: HashSet<usize> = order.iter().copied().collect();
            let passes = (0..count)
                .filter(|i| !scheduled.contains(i))
                .map(|i| self.pass_nodes[i].name.clone())
                .collect();
            return Err(RendererError::GraphCycle { passes });
        }

        // A barrier follows every pass whose writes are touched by a later pass
        let barrier_after = order
            .iter()
            .enumerate()
            .map(|(position, &index)| {
                let node = &self.pass_nodes[index];
                node.written_resources().any(|resource| {
                    order[position + 1..].iter().any(|&later| {
                        let later = &self.pass_nodes[later];
                        later.reads_resource(resource) || later.writes_resource(resource)
                    })
                })
            })
            .collect();

        let pass_order = order.iter().map(|&i| self.pass_nodes[i].id).collect();

        Ok(CompiledGraph {
            pass_order,
            barrier_after,
        })
    }

    /// Get all passes
    pub fn passes(&self) -> &[Box<dyn RenderPass>] {
        &self.passes
    }

    /// Get mutable passes
    pub fn passes_mut(&mut self) -> &mut [Box<dyn RenderPass>] {
        &mut self.passes
    }

    /// Get pass nodes (metadata)
    pub fn pass_nodes(&self) -> &[PassNode] {
        &self.pass_nodes
    }

    /// Get all resources
    pub fn resources(&self) -> &[VirtualResource] {
        &self.resources
    }

    /// Get pass by ID
    pub fn get_pass(&self, id: PassId) -> Option<&dyn RenderPass> {
        let index = self.pass_nodes.iter().position(|n| n.id == id)?;
        Some(self.passes[index].as_ref())
    }

    /// Get pass node by ID
    pub fn get_pass_node(&self, id: PassId) -> Option<&PassNode> {
        self.pass_nodes.iter().find(|n| n.id == id)
    }
}

impl Default for RenderGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Compiled render graph: execution order and synchronization points
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    pub pass_order: Vec<PassId>,
    /// Parallel to `pass_order`
    pub barrier_after: Vec<bool>,
}

impl CompiledGraph {
    pub fn needs_barrier_after(&self, pass: PassId) -> bool {
        self.pass_order
            .iter()
            .position(|&p| p == pass)
            .is_some_and(|i| self.barrier_after[i])
    }

    /// Pass names in execution order
    pub fn pass_names<'g>(&self, graph: &'g RenderGraph) -> Vec<&'g str> {
        self.pass_order
            .iter()
            .filter_map(|&id| graph.get_pass_node(id))
            .map(|node| node.name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::types::*;

    /// Pass that only declares accesses
    struct Declared {
        name: &'static str,
        reads: Vec<(&'static str, ResourceUsage)>,
        writes: Vec<(&'static str, ResourceUsage)>,
    }

    impl Declared {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                reads: Vec::new(),
                writes: Vec::new(),
            }
        }

        fn reads(mut self, resource: &'static str) -> Self {
            self.reads.push((resource, ResourceUsage::TextureRead));
            self
        }

        fn writes(mut self, resource: &'static str) -> Self {
            self.writes.push((resource, ResourceUsage::RenderTarget));
            self
        }

        fn loads(mut self, resource: &'static str) -> Self {
            self.writes.push((resource, ResourceUsage::RenderTargetLoad));
            self
        }
    }

    impl RenderPass for Declared {
        fn name(&self) -> &str {
            self.name
        }

        fn pass_type(&self) -> PassType {
            PassType::Graphics
        }

        fn setup(&mut self, ctx: &mut PassSetupContext) -> RendererResult<()> {
            for (name, usage) in &self.reads {
                let id = ctx.resource(name)?;
                ctx.read(id, *usage);
            }
            for (name, usage) in &self.writes {
                let id = ctx.resource(name)?;
                ctx.write(id, *usage);
            }
            Ok(())
        }

        fn prepare(&mut self, _ctx: &mut PassPrepareContext) -> RendererResult<()> {
            Ok(())
        }

        fn execute(&self, _ctx: &mut PassExecuteContext) -> RendererResult<()> {
            Ok(())
        }
    }

    fn graph_with(resources: &[&str]) -> RenderGraph {
        let mut graph = RenderGraph::new();
        for name in resources {
            graph.import(name);
        }
        graph
    }

    #[test]
    fn consumer_declared_first_runs_after_producer() {
        let mut graph = graph_with(&["a", "out"]);
        graph.add_pass(Declared::new("consume").reads("a").writes("out")).unwrap();
        graph.add_pass(Declared::new("produce").writes("a")).unwrap();

        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.pass_names(&graph), vec!["produce", "consume"]);
        assert_eq!(compiled.barrier_after, vec![true, false]);
    }

    #[test]
    fn every_reader_follows_a_later_declared_writer() {
        let mut graph = graph_with(&["a", "x", "y"]);
        graph.add_pass(Declared::new("sample x").reads("a").writes("x")).unwrap();
        graph.add_pass(Declared::new("sample y").reads("a").writes("y")).unwrap();
        graph.add_pass(Declared::new("refill").writes("a")).unwrap();

        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.pass_names(&graph), vec!["refill", "sample x", "sample y"]);
        assert!(compiled.needs_barrier_after(PassId(2)));
        assert!(!compiled.needs_barrier_after(PassId(0)));
    }

    #[test]
    fn independent_passes_keep_declaration_order() {
        let mut graph = graph_with(&["x", "y", "z"]);
        graph.add_pass(Declared::new("first").writes("x")).unwrap();
        graph.add_pass(Declared::new("second").writes("y")).unwrap();
        graph.add_pass(Declared::new("third").writes("z")).unwrap();

        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.pass_names(&graph), vec!["first", "second", "third"]);
        assert!(compiled.barrier_after.iter().all(|b| !b));
    }

    #[test]
    fn writers_of_one_resource_are_ordered_and_fenced() {
        let mut graph = graph_with(&["g", "layers", "out"]);
        graph.add_pass(Declared::new("composite").reads("g").reads("layers").writes("out")).unwrap();
        graph.add_pass(Declared::new("geometry").writes("g")).unwrap();
        for name in ["shadow 0", "shadow 1", "shadow 2"] {
            graph
                .add_pass(Declared {
                    name,
                    reads: vec![("g", ResourceUsage::TextureRead)],
                    writes: vec![("layers", ResourceUsage::StorageWrite)],
                })
                .unwrap();
        }

        let compiled = graph.compile().unwrap();
        assert_eq!(
            compiled.pass_names(&graph),
            vec!["geometry", "shadow 0", "shadow 1", "shadow 2", "composite"]
        );
        assert_eq!(compiled.barrier_after, vec![true, true, true, true, false]);
    }

    #[test]
    fn read_modify_write_follows_writer() {
        let mut graph = graph_with(&["color"]);
        graph.add_pass(Declared::new("clear").writes("color")).unwrap();
        graph.add_pass(Declared::new("overlay").loads("color")).unwrap();

        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.pass_names(&graph), vec!["clear", "overlay"]);
        assert!(compiled.needs_barrier_after(PassId(0)));
        assert!(!compiled.needs_barrier_after(PassId(1)));
    }

    #[test]
    fn cycle_is_an_error() {
        let mut graph = graph_with(&["x", "y"]);
        graph.add_pass(Declared::new("a").reads("x").writes("y")).unwrap();
        graph.add_pass(Declared::new("b").reads("y").writes("x")).unwrap();

        match graph.compile() {
            Err(RendererError::GraphCycle { passes }) => {
                assert_eq!(passes, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected a cycle, got {:?}", other.map(|c| c.pass_order)),
        }
    }

    #[test]
    fn unknown_resource_fails_setup() {
        let mut graph = RenderGraph::new();
        let err = graph.add_pass(Declared::new("lonely").reads("nowhere")).unwrap_err();
        assert!(matches!(err, RendererError::MissingResource(name) if name == "nowhere"));
        assert!(graph.pass_nodes().is_empty());
    }

    #[test]
    fn owned_textures_are_resolvable_by_later_passes() {
        struct Owner;
        impl RenderPass for Owner {
            fn name(&self) -> &str {
                "owner"
            }
            fn pass_type(&self) -> PassType {
                PassType::Graphics
            }
            fn setup(&mut self, ctx: &mut PassSetupContext) -> RendererResult<()> {
                let depth = ctx.create_texture(
                    "scratch_depth",
                    TextureSize::default(),
                    TextureFormat::Depth32Float,
                    TextureUsage::RENDER_ATTACHMENT,
                );
                ctx.write(depth, ResourceUsage::DepthStencilWrite);
                Ok(())
            }
            fn prepare(&mut self, _ctx: &mut PassPrepareContext) -> RendererResult<()> {
                Ok(())
            }
            fn execute(&self, _ctx: &mut PassExecuteContext) -> RendererResult<()> {
                Ok(())
            }
        }

        let mut graph = RenderGraph::new();
        graph.add_pass(Owner).unwrap();
        graph
            .add_pass(Declared {
                name: "user",
                reads: vec![],
                writes: vec![("scratch_depth", ResourceUsage::DepthStencilReadWrite)],
            })
            .unwrap();

        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.pass_names(&graph), vec!["owner", "user"]);
        assert_eq!(compiled.barrier_after, vec![true, false]);
    }
}

//! Textual dump of regions and nodes, for debugging and golden tests.
//!
//! Each node prints as `<outputs> := <op-string> <input-refs>`; region
//! boundaries print as explicit `[region-k: args=..., results=...]`
//! blocks. The format is lossless up to renaming. Colors are global state;
//! disable them with
//! [`diagnostics_color_disable`](crate::core::diagnostics_color_disable)
//! before capturing golden output.

use crate::core::graph::{ArgumentKind, Graph, NodeId, Origin, RegionId, ResultKind};
use crate::core::traverse::TopDownTraverser;
use yansi::Paint;
use {indenter::indented, std::fmt::Write};

impl Graph {
    /// Dumps the whole graph, starting at the root region.
    pub fn dump(&self) -> String {
        self.dump_region(self.root())
    }

    /// Dumps one region (and, transitively, the subregions of its
    /// structural nodes).
    pub fn dump_region(&self, region: RegionId) -> String {
        let mut out = String::new();
        self.write_region(&mut out, region);
        out
    }

    fn write_region(&self, out: &mut String, region: RegionId) {
        let mut args = Vec::new();
        for (index, arg) in self.region(region).arguments().iter().enumerate() {
            let label = match arg.kind() {
                ArgumentKind::Import { name } => {
                    format!("a{}:{} (import {})", index, arg.ty(), name)
                }
                ArgumentKind::BackEdge { result } => {
                    format!("a{}:{} (backedge r{})", index, arg.ty(), result)
                }
                _ => format!("a{}:{}", index, arg.ty()),
            };
            args.push(label);
        }

        let mut results = Vec::new();
        for (index, res) in self.region(region).results().iter().enumerate() {
            let label = match res.kind() {
                ResultKind::Export { name } => {
                    format!("r{}={} (export {})", index, res.origin(), name)
                }
                ResultKind::Predicate => format!("r{}={} (predicate)", index, res.origin()),
                ResultKind::BackEdge { argument } => {
                    format!("r{}={} (backedge a{})", index, res.origin(), argument)
                }
                _ => format!("r{}={}", index, res.origin()),
            };
            results.push(label);
        }

        let _ = writeln!(
            out,
            "{}",
            Paint::white(format!(
                "[region-{}: args=[{}], results=[{}]]",
                region.index(),
                args.join(", "),
                results.join(", ")
            ))
            .bold()
        );

        let order = TopDownTraverser::new(self, region).into_vec(self);
        for node in order {
            let mut body = String::new();
            self.write_node(&mut body, node);
            let _ = write!(indented(out).with_str("  "), "{}", body);
        }
    }

    fn write_node(&self, out: &mut String, node: NodeId) {
        let data = self.node(node);

        let outputs: Vec<String> = (0..data.noutputs())
            .map(|i| format!("{}", Origin::Output(node, i)))
            .collect();
        let inputs: Vec<String> = data
            .inputs()
            .iter()
            .map(|i| format!("{}", i.origin()))
            .collect();

        if !outputs.is_empty() {
            let _ = write!(out, "{} := ", outputs.join(", "));
        }
        let _ = write!(
            out,
            "{}",
            Paint::green(data.operation().debug_string()).bold()
        );
        if !inputs.is_empty() {
            let _ = write!(out, " {}", inputs.join(", "));
        }
        let _ = writeln!(out);

        for sub in data.subregions() {
            let mut nested = String::new();
            self.write_region(&mut nested, *sub);
            let _ = write!(indented(out).with_str("  "), "{}", nested);
        }
    }
}

//! Graph command - Resolve and display the dependency graph
//!
//! Usage:
//!   ccgo-deps graph                         # Text tree of deps.toml in this directory
//!   ccgo-deps graph -c path/to/deps.toml    # Explicit configuration file
//!   ccgo-deps graph --lockfile deps.lock    # Reproduce a locked graph
//!   ccgo-deps graph --format json           # Output as JSON
//!   ccgo-deps graph --format dot            # Output as Graphviz DOT
//!   ccgo-deps graph --format levels         # Build order, one level per line
//!   ccgo-deps graph --allow-error           # Show the partial graph on conflicts

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, ValueEnum};
use console::style;
use serde::Serialize;

use ccgo_deps::dependency::{Context, DepsGraph, GraphNode, LockStatus, PackageType};
use ccgo_deps::recipe::{OptionValues, RecipeStatus};

use super::{load_config, load_lock, resolve_graph};
use crate::utils::terminal::print_warning;

/// Output format for graph command
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Text tree (default)
    #[default]
    Text,
    /// JSON format
    Json,
    /// Graphviz DOT format
    Dot,
    /// Build order levels
    Levels,
}

/// Resolve and display the dependency graph
#[derive(Args, Debug)]
pub struct GraphCommand {
    /// Path to deps.toml (default: search current and parent directories)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Reproduce the graph recorded in this lockfile
    #[arg(long)]
    pub lockfile: Option<PathBuf>,

    /// Output format: text, json, dot, levels
    #[arg(long, short = 'f', value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Record conflicts and missing recipes instead of failing
    #[arg(long)]
    pub allow_error: bool,
}

// ============================================================================
// JSON Output Structures
// ============================================================================

#[derive(Serialize, Debug)]
struct GraphJson {
    nodes: Vec<NodeJson>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    aliased: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    overrides: Vec<OverrideJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize, Debug)]
struct NodeJson {
    id: usize,
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    reference: Option<String>,
    context: Context,
    package_type: PackageType,
    recipe: RecipeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    options: OptionValues,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    settings: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    package_id: Option<String>,
    lock_status: LockStatus,
    dependencies: Vec<EdgeJson>,
}

#[derive(Serialize, Debug)]
struct EdgeJson {
    node: usize,
    #[serde(rename = "ref")]
    reference: String,
    build: bool,
    private: bool,
    test: bool,
    visible: bool,
    headers: bool,
    libs: bool,
    run: bool,
}

#[derive(Serialize, Debug)]
struct OverrideJson {
    consumer: String,
    declared: String,
    forced: String,
    by: String,
}

impl GraphCommand {
    /// Execute the graph command
    pub fn execute(self, _verbose: bool) -> Result<()> {
        let (_, config) = load_config(self.config.as_deref())?;

        let mut settings = config.builder_settings();
        settings.allow_error |= self.allow_error;
        let lock = match &self.lockfile {
            Some(path) => Some(load_lock(path, config.resolver.partial_lock)?),
            None => None,
        };

        let mut graph = resolve_graph(&config, settings, lock.as_ref())?;

        let output = match self.format {
            OutputFormat::Text => format_text(&graph),
            OutputFormat::Json => format_json(&graph)?,
            OutputFormat::Dot => format_dot(&graph),
            OutputFormat::Levels => format_levels(&graph),
        };
        print!("{}", output);

        if let Some(error) = graph.error.take() {
            return Err(error.into());
        }
        let missing: Vec<&str> = graph
            .nodes()
            .iter()
            .filter(|n| n.is_missing())
            .map(|n| n.display_name.as_str())
            .collect();
        if !missing.is_empty() {
            print_warning(&format!("Missing recipes: {}", missing.join(", ")));
        }
        Ok(())
    }
}

fn format_text(graph: &DepsGraph) -> String {
    let mut output = graph.format_tree();
    let stats = graph.stats();
    output.push_str(&format!(
        "\n{} {} packages, {} edges, {} shared, depth {}\n",
        style("Graph:").bold(),
        stats.node_count,
        stats.edge_count,
        stats.shared_count,
        stats.max_depth
    ));
    for record in &graph.overrides {
        output.push_str(&format!(
            "{} '{}' required by '{}' overridden to '{}' by '{}'\n",
            style("Override:").yellow(),
            record.declared,
            record.consumer,
            record.forced,
            record.by
        ));
    }
    output
}

fn format_json(graph: &DepsGraph) -> Result<String> {
    let nodes = graph.nodes().iter().map(|n| node_to_json(graph, n)).collect();
    let document = GraphJson {
        nodes,
        aliased: graph
            .aliased
            .iter()
            .map(|(alias, target)| (alias.to_string(), target.to_string()))
            .collect(),
        overrides: graph
            .overrides
            .iter()
            .map(|o| OverrideJson {
                consumer: o.consumer.clone(),
                declared: o.declared.to_string(),
                forced: o.forced.to_string(),
                by: o.by.clone(),
            })
            .collect(),
        error: graph.error.as_ref().map(ToString::to_string),
    };
    let mut json = serde_json::to_string_pretty(&document)?;
    json.push('\n');
    Ok(json)
}

fn node_to_json(graph: &DepsGraph, node: &GraphNode) -> NodeJson {
    let dependencies = node
        .dependencies
        .iter()
        .map(|&edge_id| {
            let edge = graph.edge(edge_id);
            let require = &edge.require;
            EdgeJson {
                node: edge.dst,
                reference: require.reference.to_string(),
                build: require.build,
                private: require.private,
                test: require.test,
                visible: require.is_visible(),
                headers: require.includes_headers(),
                libs: require.links(),
                run: require.runs(),
            }
        })
        .collect();

    NodeJson {
        id: node.id,
        reference: node.reference.as_ref().map(ToString::to_string),
        context: node.context,
        package_type: node.package_type,
        recipe: node.recipe,
        remote: node.remote.clone(),
        options: node.options.clone(),
        settings: node.settings.clone(),
        package_id: node.package_id.clone(),
        lock_status: node.lock_status,
        dependencies,
    }
}

fn dot_id(node: &GraphNode) -> String {
    format!("n{}", node.id)
}

fn format_dot(graph: &DepsGraph) -> String {
    let mut out = String::new();
    out.push_str("digraph dependencies {\n");
    out.push_str("    rankdir=TB;\n");
    out.push_str("    node [shape=box, style=filled, fillcolor=lightblue, fontname=\"Helvetica\"];\n");
    out.push_str("    edge [fontname=\"Helvetica\", fontsize=10];\n\n");

    for node in graph.nodes() {
        let color = if node.id == graph.root().id {
            "lightgreen"
        } else if node.is_missing() {
            "salmon"
        } else if node.context == Context::Build {
            "khaki"
        } else {
            "lightblue"
        };
        out.push_str(&format!(
            "    \"{}\" [label=\"{}\", fillcolor={}];\n",
            dot_id(node),
            node.display_name.replace('"', "\\\""),
            color
        ));
    }
    out.push('\n');

    for edge in graph.edges() {
        let mut attrs = Vec::new();
        if edge.require.build {
            attrs.push("style=dashed");
        }
        if edge.require.private {
            attrs.push("color=gray");
        }
        let attrs = if attrs.is_empty() {
            String::new()
        } else {
            format!(" [{}]", attrs.join(", "))
        };
        out.push_str(&format!(
            "    \"{}\" -> \"{}\"{};\n",
            dot_id(graph.node(edge.src)),
            dot_id(graph.node(edge.dst)),
            attrs
        ));
    }

    out.push_str("}\n");
    out
}

fn format_levels(graph: &DepsGraph) -> String {
    graph
        .by_levels()
        .iter()
        .enumerate()
        .map(|(i, level)| {
            let names: Vec<&str> = level
                .iter()
                .map(|&id| graph.node(id).display_name.as_str())
                .collect();
            format!("{}: {}\n", i, names.join(", "))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccgo_deps::config::DepsConfig;
    use ccgo_deps::dependency::DepsGraphBuilder;

    fn graph_for(content: &str) -> DepsGraph {
        let config = DepsConfig::parse(content).unwrap();
        let index = config.to_index().unwrap();
        let mut builder = DepsGraphBuilder::new(&index, &index, config.builder_settings());
        builder.load_graph(config.root().unwrap()).unwrap()
    }

    const DIAMOND: &str = r#"
[root]
requires = ["libb/1.0", "libc/1.0"]
build_requires = ["tool/1.0"]

[[recipe]]
ref = "liba/1.0"

[[recipe]]
ref = "libb/1.0"
requires = ["liba/1.0"]

[[recipe]]
ref = "libc/1.0"
requires = ["liba/1.0"]

[[recipe]]
ref = "tool/1.0"
package_type = "application"
"#;

    #[test]
    fn test_output_format_default() {
        assert_eq!(OutputFormat::default(), OutputFormat::Text);
    }

    #[test]
    fn test_levels_output() {
        let graph = graph_for(DIAMOND);
        let levels = format_levels(&graph);
        let lines: Vec<&str> = levels.lines().collect();
        assert_eq!(lines[0], "0: liba/1.0, tool/1.0");
        assert_eq!(lines[1], "1: libb/1.0, libc/1.0");
        assert_eq!(lines[2], "2: virtual");
    }

    #[test]
    fn test_dot_output() {
        let graph = graph_for(DIAMOND);
        let dot = format_dot(&graph);
        assert!(dot.starts_with("digraph dependencies {"));
        assert!(dot.contains("label=\"liba/1.0\""));
        assert!(dot.contains("style=dashed"), "build edge is dashed");
        assert_eq!(dot.matches(" -> ").count(), graph.edges().len());
    }

    #[test]
    fn test_json_output() {
        let graph = graph_for(DIAMOND);
        let json: serde_json::Value = serde_json::from_str(&format_json(&graph).unwrap()).unwrap();
        let nodes = json["nodes"].as_array().unwrap();
        assert_eq!(nodes.len(), 5);
        assert!(nodes[0].get("ref").is_none(), "virtual root has no ref");
        assert!(json.get("error").is_none());

        let tool = nodes.iter().find(|n| n["ref"] == "tool/1.0").unwrap();
        assert_eq!(tool["context"], "build");
    }

    #[test]
    fn test_text_output_marks_shared_nodes() {
        let graph = graph_for(DIAMOND);
        let text = format_text(&graph);
        assert!(text.contains("(already resolved)"));
        assert!(text.contains("5 packages"));
        assert!(text.contains("1 shared"));
    }
}

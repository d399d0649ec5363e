//! Interference graphs and the agent count they imply.
//!
//! Each flow of the graph becomes one agent, numbered in file order.

use crate::error::{EnvError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// Positions are links; every link is a co-located tx/rx pair carrying one flow.
    #[default]
    Link,
    /// Positions are nodes; flows are listed explicitly.
    Node,
}

impl FromStr for Layout {
    type Err = EnvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "link" => Ok(Self::Link),
            "node" => Ok(Self::Node),
            other => Err(EnvError::Config(format!("unknown graph layout {:?}", other))),
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Link => write!(f, "link"),
            Self::Node => write!(f, "node"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub positions: Vec<(f32, f32)>,
    pub edges: BTreeSet<(u32, u32)>,
    pub flows: Vec<(u32, u32)>,
}

impl Graph {
    pub fn num_nodes(&self) -> usize {
        self.positions.len()
    }

    pub fn num_flows(&self) -> usize {
        self.flows.len()
    }

    fn add_node(&mut self, x: f32, y: f32) {
        self.positions.push((x, y));
    }

    /// Returns false if the edge was already present.
    fn add_edge(&mut self, a: u32, b: u32) -> bool {
        self.edges.insert((a, b))
    }

    fn add_flow(&mut self, tx: u32, rx: u32) {
        self.flows.push((tx, rx));
    }

    pub fn parse(text: &str, layout: Layout) -> Result<Self> {
        let mut tokens = Tokens::new(text);
        let mut graph = Graph::default();

        match layout {
            Layout::Link => {
                let n = tokens.next_count()?;
                for i in 0..n as u32 {
                    let (x, y) = (tokens.next_f32()?, tokens.next_f32()?);
                    // sender and receiver share a position
                    graph.add_node(x, y);
                    graph.add_node(x, y);
                    graph.add_edge(i * 2, i * 2 + 1);
                    graph.add_flow(i * 2, i * 2 + 1);
                }

                let m = tokens.next_count()?;
                for _ in 0..m {
                    let (a, b) = (tokens.next_index(n)?, tokens.next_index(n)?);
                    for ea in [a * 2, a * 2 + 1] {
                        for eb in [b * 2, b * 2 + 1] {
                            graph.add_edge(ea, eb);
                        }
                    }
                }
            }
            Layout::Node => {
                let n = tokens.next_count()?;
                for _ in 0..n {
                    let (x, y) = (tokens.next_f32()?, tokens.next_f32()?);
                    graph.add_node(x, y);
                }

                let m = tokens.next_count()?;
                for _ in 0..m {
                    let (a, b) = (tokens.next_index(n)?, tokens.next_index(n)?);
                    graph.add_edge(a, b);
                }

                let k = tokens.next_count()?;
                for _ in 0..k {
                    let (a, b) = (tokens.next_index(n)?, tokens.next_index(n)?);
                    graph.add_flow(a, b);
                }
            }
        }

        Ok(graph)
    }
}

struct Tokens<'a> {
    inner: std::str::SplitWhitespace<'a>,
}

impl<'a> Tokens<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            inner: text.split_whitespace(),
        }
    }

    fn next_str(&mut self) -> Result<&'a str> {
        self.inner
            .next()
            .ok_or_else(|| EnvError::Config("graph file ended early".to_string()))
    }

    fn next_count(&mut self) -> Result<usize> {
        let tok = self.next_str()?;
        tok.parse()
            .map_err(|_| EnvError::Config(format!("bad count {:?} in graph file", tok)))
    }

    fn next_f32(&mut self) -> Result<f32> {
        let tok = self.next_str()?;
        tok.parse()
            .map_err(|_| EnvError::Config(format!("bad coordinate {:?} in graph file", tok)))
    }

    fn next_index(&mut self, bound: usize) -> Result<u32> {
        let tok = self.next_str()?;
        match tok.parse::<u32>() {
            Ok(i) if (i as usize) < bound => Ok(i),
            _ => Err(EnvError::Config(format!(
                "bad index {:?} in graph file (expected < {})",
                tok, bound
            ))),
        }
    }
}

pub trait TopologyLoader: Send + Sync {
    /// Resolve a topology name to its graph and agent count.
    fn load(&self, name: &str) -> Result<(Graph, usize)>;
}

/// Built-in graphs first, then `<dir>/<layout>/<name>.txt` on disk.
pub struct TopologyRegistry {
    builtin: HashMap<String, (Layout, &'static str)>,
    dir: Option<PathBuf>,
    layout: Layout,
}

impl TopologyRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            builtin: HashMap::new(),
            dir: None,
            layout: Layout::Link,
        };
        registry.register_builtin();
        registry
    }

    fn register_builtin(&mut self) {
        self.register("fim", Layout::Link, include_str!("../graphs/link/fim.txt"));
        self.register("chain4", Layout::Link, include_str!("../graphs/link/chain4.txt"));
        self.register("hidden", Layout::Node, include_str!("../graphs/node/hidden.txt"));
    }

    pub fn register(&mut self, name: &str, layout: Layout, text: &'static str) {
        self.builtin.insert(name.to_lowercase(), (layout, text));
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>, layout: Layout) -> Self {
        self.dir = Some(dir.into());
        self.layout = layout;
        self
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.builtin.keys().cloned().collect();
        names.sort();
        names
    }

    fn graph_path(&self, dir: &Path, name: &str) -> PathBuf {
        dir.join(self.layout.to_string()).join(format!("{}.txt", name))
    }
}

impl Default for TopologyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TopologyLoader for TopologyRegistry {
    fn load(&self, name: &str) -> Result<(Graph, usize)> {
        let graph = if let Some((layout, text)) = self.builtin.get(&name.to_lowercase()) {
            Graph::parse(text, *layout)?
        } else if let Some(dir) = &self.dir {
            let path = self.graph_path(dir, name);
            let text = std::fs::read_to_string(&path).map_err(|e| {
                EnvError::Config(format!("topology file {} not readable: {}", path.display(), e))
            })?;
            Graph::parse(&text, self.layout)?
        } else {
            return Err(EnvError::Config(format!("unsupported topology {:?}", name)));
        };

        let n_agents = graph.num_flows();
        if n_agents == 0 {
            return Err(EnvError::Config(format!("topology {:?} has no flows", name)));
        }
        Ok((graph, n_agents))
    }
}

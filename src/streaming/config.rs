// Declarative pipeline description
//
// A JSON document lists named sources, transforms and sinks plus the edges
// between them. Building it validates the graph (unique names, edges only
// from producers to consumers, no cycles), derives each transform's input
// channels from its first producer, checks every edge's channel schema and
// returns a runnable `Pipeline`. Consumers are subscribed in edge order, which
// fixes the broadcast order.
//
// Example:
// {
//   "sources":    [{"name": "headset", "type": "simulated", "device": "muse"}],
//   "transforms": [{"name": "per_second", "type": "downsample", "window": 256}],
//   "sinks":      [{"name": "recording", "type": "file", "path": "out.json"}],
//   "edges": [
//     {"from": "headset", "to": "per_second"},
//     {"from": "per_second", "to": "recording"}
//   ]
// }

use crate::streaming::envelope::ChannelSchema;
use crate::streaming::graph::{ConsumerHandle, Producer};
use crate::streaming::pipeline::Pipeline;
use crate::streaming::sink::{create_sink, ForwardingPool, SinkConfig};
use crate::streaming::source::{Source, SourceConfig};
use crate::streaming::transform::{create_transform, Transform, TransformConfig};
use crate::streaming::types::{StreamError, StreamResult};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    pub name: String,
    #[serde(flatten)]
    pub config: SourceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformEntry {
    pub name: String,
    #[serde(flatten)]
    pub config: TransformConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkEntry {
    pub name: String,
    #[serde(flatten)]
    pub config: SinkConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Source,
    Transform,
    Sink,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
    #[serde(default)]
    pub transforms: Vec<TransformEntry>,
    #[serde(default)]
    pub sinks: Vec<SinkEntry>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// Validated graph structure
struct Plan {
    /// Node names, topologically sorted
    order: Vec<String>,
    kinds: HashMap<String, NodeKind>,
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> StreamResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            StreamError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> StreamResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| StreamError::InvalidConfig(format!("invalid pipeline config: {}", e)))
    }

    /// Consumers of `name`, in edge order
    fn consumers_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.edges
            .iter()
            .filter(move |e| e.from == name)
            .map(|e| e.to.as_str())
    }

    fn plan(&self) -> StreamResult<Plan> {
        let mut kinds = HashMap::new();
        let named = self
            .sources
            .iter()
            .map(|s| (s.name.as_str(), NodeKind::Source))
            .chain(self.transforms.iter().map(|t| (t.name.as_str(), NodeKind::Transform)))
            .chain(self.sinks.iter().map(|s| (s.name.as_str(), NodeKind::Sink)));

        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut indices: HashMap<String, NodeIndex> = HashMap::new();

        for (name, kind) in named {
            if name.is_empty() {
                return Err(StreamError::InvalidConfig("node names must not be empty".to_string()));
            }
            if kinds.insert(name.to_string(), kind).is_some() {
                return Err(StreamError::InvalidConfig(format!("duplicate node name '{}'", name)));
            }
            indices.insert(name.to_string(), graph.add_node(name.to_string()));
        }

        if self.sources.is_empty() {
            return Err(StreamError::InvalidConfig("pipeline has no sources".to_string()));
        }

        for (i, edge) in self.edges.iter().enumerate() {
            let from = kinds.get(&edge.from).ok_or_else(|| {
                StreamError::InvalidConfig(format!("edge from unknown node '{}'", edge.from))
            })?;
            let to = kinds.get(&edge.to).ok_or_else(|| {
                StreamError::InvalidConfig(format!("edge to unknown node '{}'", edge.to))
            })?;
            if *from == NodeKind::Sink {
                return Err(StreamError::InvalidConfig(format!(
                    "sink '{}' cannot feed other nodes",
                    edge.from
                )));
            }
            if *to == NodeKind::Source {
                return Err(StreamError::InvalidConfig(format!(
                    "source '{}' cannot receive envelopes",
                    edge.to
                )));
            }
            if self.edges[..i].contains(edge) {
                return Err(StreamError::InvalidConfig(format!(
                    "duplicate edge {} -> {}",
                    edge.from, edge.to
                )));
            }
            graph.add_edge(indices[&edge.from], indices[&edge.to], ());
        }

        let sorted = toposort(&graph, None).map_err(|cycle| {
            StreamError::InvalidConfig(format!(
                "pipeline graph has a cycle through '{}'",
                graph[cycle.node_id()]
            ))
        })?;

        for transform in &self.transforms {
            if !self.edges.iter().any(|e| e.to == transform.name) {
                return Err(StreamError::InvalidConfig(format!(
                    "transform '{}' has no producer",
                    transform.name
                )));
            }
        }
        for (name, kind) in &kinds {
            if *kind != NodeKind::Sink && self.consumers_of(name).next().is_none() {
                log::warn!("'{}' has no consumers; its output is discarded", name);
            }
        }

        Ok(Plan {
            order: sorted.into_iter().map(|i| graph[i].clone()).collect(),
            kinds,
        })
    }

    /// Check the graph structure without opening anything
    pub fn validate(&self) -> StreamResult<()> {
        self.plan().map(|_| ())
    }

    /// Create every node, wire the graph and hand the sources to a pipeline
    pub async fn build(&self) -> StreamResult<Pipeline> {
        let plan = self.plan()?;
        let pool = Arc::new(ForwardingPool::new());

        let mut sources: HashMap<&str, Source> = HashMap::new();
        for entry in &self.sources {
            sources.insert(&entry.name, Source::from_config(&entry.name, entry.config.clone())?);
        }

        let mut handles: HashMap<String, ConsumerHandle> = HashMap::new();
        for entry in &self.sinks {
            let handle = create_sink(&entry.name, entry.config.clone(), &pool).await?;
            handles.insert(entry.name.clone(), handle);
        }

        // Producers precede consumers in topological order, so each
        // transform's input schema is known when it is created.
        let transform_configs: HashMap<&str, &TransformConfig> = self
            .transforms
            .iter()
            .map(|t| (t.name.as_str(), &t.config))
            .collect();
        let mut schemas: HashMap<String, Arc<ChannelSchema>> = sources
            .iter()
            .map(|(name, source)| (name.to_string(), source.output_schema()))
            .collect();
        let mut transforms: HashMap<String, Box<dyn Transform>> = HashMap::new();

        for name in &plan.order {
            if plan.kinds[name] != NodeKind::Transform {
                continue;
            }
            let first_producer = self
                .edges
                .iter()
                .find(|e| &e.to == name)
                .map(|e| e.from.as_str())
                .ok_or_else(|| {
                    StreamError::InvalidConfig(format!("transform '{}' has no producer", name))
                })?;
            let input = schemas.get(first_producer).cloned().ok_or_else(|| {
                StreamError::InvalidConfig(format!("no channel schema for '{}'", first_producer))
            })?;
            let transform = create_transform(name, transform_configs[name.as_str()].clone(), input)?;
            schemas.insert(name.clone(), transform.output_schema());
            transforms.insert(name.clone(), transform);
        }

        // Wire from the leaves up: every consumer is wrapped before any of
        // its producers subscribe it.
        for name in plan.order.iter().rev() {
            if let Some(mut transform) = transforms.remove(name) {
                self.subscribe_consumers(name, transform.as_mut(), &handles)?;
                handles.insert(name.clone(), ConsumerHandle::new(transform));
            }
        }

        let mut pipeline = Pipeline::new();
        for entry in &self.sources {
            let Some(mut source) = sources.remove(entry.name.as_str()) else {
                continue;
            };
            self.subscribe_consumers(&entry.name, &mut source, &handles)?;
            pipeline.add_source(source)?;
        }

        log::info!(
            "Built pipeline {} ({} sources, {} transforms, {} sinks, {} forwarding ports)",
            pipeline.id,
            self.sources.len(),
            self.transforms.len(),
            self.sinks.len(),
            pool.len()
        );
        Ok(pipeline)
    }

    fn subscribe_consumers<P: Producer + ?Sized>(
        &self,
        name: &str,
        producer: &mut P,
        handles: &HashMap<String, ConsumerHandle>,
    ) -> StreamResult<()> {
        for consumer in self.consumers_of(name) {
            let handle = handles.get(consumer).ok_or_else(|| {
                StreamError::InvalidConfig(format!("'{}' is not built yet", consumer))
            })?;
            producer.subscribe(handle.clone()).map_err(|e| {
                StreamError::InvalidConfig(format!("cannot connect '{}' -> '{}': {}", name, consumer, e))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(json: &str) -> PipelineConfig {
        PipelineConfig::from_json(json).unwrap()
    }

    #[test]
    fn test_parses_flattened_entries() {
        let config = config(
            r#"{
                "sources": [{"name": "noise", "type": "random", "channel_count": 3}],
                "sinks": [{"name": "screen", "type": "console"}],
                "edges": [{"from": "noise", "to": "screen"}]
            }"#,
        );
        assert_eq!(config.sources[0].name, "noise");
        assert!(matches!(
            config.sources[0].config,
            SourceConfig::Random { channel_count: 3, .. }
        ));
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_cycles() {
        let config = config(
            r#"{
                "sources": [{"name": "noise", "type": "random"}],
                "transforms": [
                    {"name": "a", "type": "scale", "factor": 2},
                    {"name": "b", "type": "scale", "factor": 2}
                ],
                "edges": [
                    {"from": "noise", "to": "a"},
                    {"from": "a", "to": "b"},
                    {"from": "b", "to": "a"}
                ]
            }"#,
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_rejects_edges_into_sources_and_out_of_sinks() {
        let into_source = config(
            r#"{
                "sources": [{"name": "a", "type": "random"}, {"name": "b", "type": "random"}],
                "edges": [{"from": "a", "to": "b"}]
            }"#,
        );
        assert!(into_source.validate().is_err());

        let out_of_sink = config(
            r#"{
                "sources": [{"name": "a", "type": "random"}],
                "sinks": [{"name": "s", "type": "console"}, {"name": "t", "type": "console"}],
                "edges": [{"from": "s", "to": "t"}]
            }"#,
        );
        assert!(out_of_sink.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicate_names_and_unknown_nodes() {
        let duplicate = config(
            r#"{
                "sources": [{"name": "a", "type": "random"}],
                "sinks": [{"name": "a", "type": "console"}]
            }"#,
        );
        assert!(duplicate.validate().is_err());

        let unknown = config(
            r#"{
                "sources": [{"name": "a", "type": "random"}],
                "edges": [{"from": "a", "to": "nowhere"}]
            }"#,
        );
        assert!(unknown.validate().is_err());
    }

    #[tokio::test]
    async fn test_build_rejects_oversized_windows() {
        for transform in [
            r#"{"name": "t", "type": "downsample", "window": 1000000000000000000}"#,
            r#"{"name": "t", "type": "downsample", "input_rate": 1e300, "target_rate": 1e-300}"#,
            r#"{"name": "t", "type": "analysis", "sample_rate": 256, "window_seconds": 18446744073709551615}"#,
        ] {
            let config = config(&format!(
                r#"{{
                    "sources": [{{"name": "noise", "type": "random", "channel_count": 4}}],
                    "transforms": [{}],
                    "sinks": [{{"name": "screen", "type": "console"}}],
                    "edges": [
                        {{"from": "noise", "to": "t"}},
                        {{"from": "t", "to": "screen"}}
                    ]
                }}"#,
                transform
            ));
            let Err(err) = config.build().await else {
                panic!("{} should not build", transform);
            };
            assert!(matches!(err, StreamError::InvalidConfig(_)), "{}: {}", transform, err);
        }

        let config = config(
            r#"{
                "sources": [{"name": "headset", "type": "simulated", "sample_rate": 1e18}],
                "sinks": [{"name": "screen", "type": "console"}],
                "edges": [{"from": "headset", "to": "screen"}]
            }"#,
        );
        assert!(matches!(config.build().await, Err(StreamError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_build_rejects_schema_mismatch() {
        // Two random sources with different channel counts cannot share a scale transform
        let config = config(
            r#"{
                "sources": [
                    {"name": "two", "type": "random", "channel_count": 2},
                    {"name": "three", "type": "random", "channel_count": 3}
                ],
                "transforms": [{"name": "scale", "type": "scale", "factor": 2}],
                "sinks": [{"name": "screen", "type": "console"}],
                "edges": [
                    {"from": "two", "to": "scale"},
                    {"from": "three", "to": "scale"},
                    {"from": "scale", "to": "screen"}
                ]
            }"#,
        );
        assert!(config.build().await.is_err());
    }
}

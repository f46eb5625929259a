//! Layer graph, traversal and the mini-batch training loop.
//!
//! A [`Network`] owns an arena of nodes built from a [`NetworkDescription`].
//! Each node owns one layer and the layer data that layer writes. Edges are
//! arena indices; a node listed as a child by several layers becomes a merge
//! point whose layer reads a merged buffer assembled by a [`LayerMerger`].
//!
//! Forward runs in breadth-first topological order from the nodes of the first
//! declared layer, which read the network input. Backward runs in depth-first
//! post-order, so a node back-propagates only once every child has added its
//! share into the node's error slot.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, trace};
use serde_json::{Map, Value};

use crate::architecture::{parse_description, validate_description, NetworkDescription};
use crate::config::TrainingConfig;
use crate::device::ComputeContext;
use crate::error::{NetworkError, Result};
use crate::kernels::argmax;
use crate::layer_data::{LayerData, Slot};
use crate::layers::{create_layer, Layer, LayerKind, LayerOptions, LayerShape, LayerSpec, Shape};
use crate::merger::LayerMerger;
use crate::utils::{Activation, SimpleRng};

/// Identifier of a node: the declaring layer's id and the sibling index
/// within a branch (0 for every other layer).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub layer: String,
    pub branch: usize,
}

impl NodeId {
    pub fn new(layer: impl Into<String>, branch: usize) -> Self {
        Self {
            layer: layer.into(),
            branch,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.layer, self.branch)
    }
}

#[derive(Debug)]
struct MergePoint {
    merger: LayerMerger<NodeId>,
    data: LayerData,
}

#[derive(Debug)]
struct Node {
    id: NodeId,
    layer: Box<dyn Layer>,
    data: LayerData,
    parents: Vec<usize>,
    children: Vec<usize>,
    merge: Option<MergePoint>,
}

/// Mean loss `½ Σ (a − t)²` per example, one entry per epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub epoch_losses: Vec<f32>,
}

impl TrainingReport {
    pub fn final_loss(&self) -> Option<f32> {
        self.epoch_losses.last().copied()
    }
}

#[derive(Debug)]
pub struct Network {
    config: TrainingConfig,
    input_shape: Shape,
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
    forward_order: Vec<usize>,
    backward_order: Vec<usize>,
    heads: Vec<usize>,
    input: LayerData,
    context: Option<Arc<ComputeContext>>,
    rng: SimpleRng,
    batch_size: usize,
}

/// A node as declared, before its layer is built.
struct Declared {
    id: NodeId,
    spec: LayerSpec,
    region: String,
    children: Vec<String>,
}

impl Network {
    /// Builds a network from a validated description.
    ///
    /// With `"accelerator": true` forward passes run through a compute
    /// context over the reference host backend.
    pub fn new(description: &NetworkDescription) -> Result<Self> {
        let context = if description.training.accelerator {
            Some(ComputeContext::host()?)
        } else {
            None
        };
        Self::build(description, context)
    }

    /// Builds a network whose forward passes run on `context` when the
    /// description enables the accelerator.
    pub fn with_context(
        description: &NetworkDescription,
        context: Arc<ComputeContext>,
    ) -> Result<Self> {
        if !description.training.accelerator {
            debug!(
                "accelerator disabled; compute context '{}' left unused",
                context.backend_name()
            );
            return Self::build(description, None);
        }
        Self::build(description, Some(context))
    }

    /// Parses `json` and builds the network it describes.
    pub fn from_json(json: &str) -> Result<Self> {
        Self::new(&parse_description(json)?)
    }

    fn build(
        description: &NetworkDescription,
        context: Option<Arc<ComputeContext>>,
    ) -> Result<Self> {
        validate_description(description)?;
        let config = description.training.clone();
        let input_shape = description.input.shape()?;
        let batch = config.batch_size;
        let mut rng = SimpleRng::new(config.seed);
        let options = LayerOptions {
            learn_rate: config.learn_rate,
            weight_init: config.weight_init,
            device: context.clone(),
        };

        // Declare one node per layer, one per sibling for branches.
        let mut declared: Vec<Declared> = Vec::new();
        let mut by_layer: HashMap<&str, Vec<usize>> = HashMap::new();
        for (index, layer) in description.layers.iter().enumerate() {
            let branch = layer.is_branch();
            for (b, spec) in layer
                .layer_specs(index, config.train_num)?
                .into_iter()
                .enumerate()
            {
                let children = if branch {
                    vec![layer.children[b].clone()]
                } else {
                    layer.children.clone()
                };
                by_layer
                    .entry(layer.id.as_str())
                    .or_default()
                    .push(declared.len());
                declared.push(Declared {
                    id: NodeId::new(layer.id.as_str(), b),
                    spec,
                    region: layer.region(index),
                    children,
                });
            }
        }

        // Resolve child ids; an edge to a branch reaches every sibling.
        let count = declared.len();
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); count];
        let mut parents: Vec<Vec<usize>> = vec![Vec::new(); count];
        for (i, node) in declared.iter().enumerate() {
            for child in &node.children {
                let targets = by_layer.get(child.as_str()).ok_or_else(|| {
                    NetworkError::config(&node.region, format!("unknown child id '{}'", child))
                })?;
                for &t in targets {
                    if children[i].contains(&t) {
                        return Err(NetworkError::config(
                            &node.region,
                            format!("child '{}' listed twice", child),
                        ));
                    }
                    children[i].push(t);
                    parents[t].push(i);
                }
            }
        }

        let roots = by_layer
            .get(description.layers[0].id.as_str())
            .cloned()
            .unwrap_or_default();
        for (i, node) in declared.iter().enumerate() {
            let is_root = roots.contains(&i);
            if is_root && !parents[i].is_empty() {
                return Err(NetworkError::config(
                    &node.region,
                    "the first layer reads the input and cannot be a child",
                ));
            }
            if !is_root && parents[i].is_empty() {
                return Err(NetworkError::config(
                    &node.region,
                    "unreachable: no layer lists it as a child",
                ));
            }
        }

        let forward_order = topological_order(&roots, &parents, &children).map_err(|stuck| {
            NetworkError::config(&declared[stuck].region, "layer graph contains a cycle")
        })?;
        let backward_order = post_order(&roots, &children);

        // Build layers parents-first so every previous shape is known.
        let input_layer = LayerShape {
            kind: LayerKind::Input,
            train_num: config.train_num,
            output: input_shape,
            activation: Activation::Identity,
        };
        let mut layers: Vec<Option<Box<dyn Layer>>> = (0..count).map(|_| None).collect();
        let mut merged_activations: Vec<Option<Activation>> = vec![None; count];
        for &i in &forward_order {
            let region = &declared[i].region;
            let shapes = parents[i]
                .iter()
                .map(|&p| {
                    layers[p].as_ref().map(|layer| layer.shape()).ok_or_else(|| {
                        NetworkError::config(region, "parent layer was not built first")
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let prev = match shapes.as_slice() {
                [] => input_layer,
                [single] => *single,
                many => {
                    let merged = merged_shape(many, region, config.train_num)?;
                    merged_activations[i] = Some(merged.activation);
                    merged
                }
            };

            let spec = &declared[i].spec;
            let layer = create_layer(&prev, spec, &options, &mut rng)
                .map_err(|err| in_region(region, err))?
                .ok_or_else(|| {
                    NetworkError::config(
                        region,
                        format!(
                            "a {} layer cannot follow a {} layer producing {:?}",
                            spec.kind(),
                            prev.kind,
                            prev.output
                        ),
                    )
                })?;
            trace!(
                "{}: {} layer, {} -> {} features",
                declared[i].id,
                layer.kind(),
                layer.input_size(),
                layer.output_size()
            );
            layers[i] = Some(layer);
        }

        let mut merges: Vec<Option<MergePoint>> = (0..count).map(|_| None).collect();
        for i in 0..count {
            if parents[i].len() < 2 {
                continue;
            }
            let activation = merged_activations[i].ok_or_else(|| {
                NetworkError::config(&declared[i].region, "merged shape was never checked")
            })?;
            let mut merger = LayerMerger::new();
            for &p in &parents[i] {
                let parent = layers[p].as_ref().ok_or_else(|| {
                    NetworkError::config(&declared[i].region, "parent layer was not built")
                })?;
                merger.register(declared[p].id.clone(), parent.output_size())?;
            }
            let data = buffer(&context, merger.width(), batch, activation)?;
            merges[i] = Some(MergePoint { merger, data });
        }

        let mut nodes = Vec::with_capacity(count);
        for (i, (node, (layer, merge))) in declared
            .into_iter()
            .zip(layers.into_iter().zip(merges))
            .enumerate()
        {
            let layer = layer.ok_or_else(|| {
                NetworkError::config(&node.region, "layer was never built")
            })?;
            let data = layer.create_layer_data(batch)?;
            nodes.push(Node {
                id: node.id,
                layer,
                data,
                parents: std::mem::take(&mut parents[i]),
                children: std::mem::take(&mut children[i]),
                merge,
            });
        }

        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.id.clone(), i))
            .collect();
        let heads: Vec<usize> = (0..nodes.len())
            .filter(|&i| nodes[i].children.is_empty())
            .collect();
        let input = buffer(&context, input_shape.len(), batch, Activation::Identity)?;

        info!(
            "network built: {} nodes, {} output heads, {} execution",
            nodes.len(),
            heads.len(),
            context
                .as_ref()
                .map(|ctx| ctx.backend_name().to_string())
                .unwrap_or_else(|| "cpu".to_string())
        );
        debug!(
            "forward order: {}",
            forward_order
                .iter()
                .map(|&i| nodes[i].id.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self {
            config,
            input_shape,
            nodes,
            index,
            forward_order,
            backward_order,
            heads,
            input,
            context,
            rng,
            batch_size: batch,
        })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn input_shape(&self) -> Shape {
        self.input_shape
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn is_accelerated(&self) -> bool {
        self.context.is_some()
    }

    pub fn context(&self) -> Option<&Arc<ComputeContext>> {
        self.context.as_ref()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Output nodes (no children), in declaration order.
    pub fn heads(&self) -> Vec<NodeId> {
        self.heads.iter().map(|&i| self.nodes[i].id.clone()).collect()
    }

    pub fn forward_order(&self) -> Vec<NodeId> {
        self.forward_order
            .iter()
            .map(|&i| self.nodes[i].id.clone())
            .collect()
    }

    pub fn backward_order(&self) -> Vec<NodeId> {
        self.backward_order
            .iter()
            .map(|&i| self.nodes[i].id.clone())
            .collect()
    }

    pub fn layer(&self, id: &NodeId) -> Option<&dyn Layer> {
        self.index.get(id).map(|&i| &*self.nodes[i].layer)
    }

    pub fn layer_data(&self, id: &NodeId) -> Option<&LayerData> {
        self.index.get(id).map(|&i| &self.nodes[i].data)
    }

    /// Merger of a convergence point, if `id` has several parents.
    pub fn merger(&self, id: &NodeId) -> Option<&LayerMerger<NodeId>> {
        self.index
            .get(id)
            .and_then(|&i| self.nodes[i].merge.as_ref())
            .map(|merge| &merge.merger)
    }

    /// Merged input buffer of a convergence point.
    pub fn merged_data(&self, id: &NodeId) -> Option<&LayerData> {
        self.index
            .get(id)
            .and_then(|&i| self.nodes[i].merge.as_ref())
            .map(|merge| &merge.data)
    }

    pub fn input_data(&self) -> &LayerData {
        &self.input
    }

    /// Activation slot of output head `head` for the current batch.
    pub fn outputs(&self, head: usize) -> Option<&[f32]> {
        self.heads
            .get(head)
            .map(|&i| self.nodes[i].data.slot(Slot::Activation))
    }

    /// Resizes every buffer for `batch_size` examples, growing capacity when
    /// needed.
    pub fn set_batch_size(&mut self, batch_size: usize) -> Result<()> {
        if batch_size == 0 {
            return Err(NetworkError::config("batch_size", "must be at least 1"));
        }
        self.input.resize(batch_size)?;
        for node in &mut self.nodes {
            node.data.resize(batch_size)?;
            if let Some(merge) = &mut node.merge {
                merge.data.resize(batch_size)?;
            }
        }
        self.batch_size = batch_size;
        Ok(())
    }

    fn set_logical_batch(&mut self, batch_size: usize) -> Result<()> {
        self.input.set_batch_size(batch_size)?;
        for node in &mut self.nodes {
            node.data.set_batch_size(batch_size)?;
            if let Some(merge) = &mut node.merge {
                merge.data.set_batch_size(batch_size)?;
            }
        }
        Ok(())
    }

    /// Copies an example-major feature buffer into the input and sets the
    /// logical batch to the number of examples it holds.
    pub fn load_input(&mut self, features: &[f32]) -> Result<()> {
        let count = self.example_count(features)?;
        self.set_logical_batch(count)?;
        self.input.slot_mut(Slot::Activation).copy_from_slice(features);
        Ok(())
    }

    fn example_count(&self, features: &[f32]) -> Result<usize> {
        let width = self.input.feature_count();
        if width == 0 || features.len() % width != 0 {
            return Err(NetworkError::shape(
                "input features (multiple of)",
                width,
                features.len(),
            ));
        }
        Ok(features.len() / width)
    }

    /// Runs every layer once over the current batch.
    pub fn forward(&mut self) -> Result<()> {
        for k in 0..self.forward_order.len() {
            let i = self.forward_order[k];
            self.forward_node(i)?;
        }
        Ok(())
    }

    fn forward_node(&mut self, i: usize) -> Result<()> {
        let parents = self.nodes[i].parents.clone();
        match parents.as_slice() {
            [] => {
                let node = &mut self.nodes[i];
                run_forward(&*node.layer, &self.input, &mut node.data)
            }
            [p] => {
                let (parent, node) = pair_mut(&mut self.nodes, *p, i);
                run_forward(&*node.layer, &parent.data, &mut node.data)
            }
            many => {
                let mut merge = self.nodes[i].merge.take().ok_or_else(|| {
                    NetworkError::config(self.nodes[i].id.to_string(), "merge point missing")
                })?;
                let result = merge_forward(&mut self.nodes, i, many, &mut merge);
                self.nodes[i].merge = Some(merge);
                result
            }
        }
    }

    /// Seeds the error slot of every output head with `f'(z) ⊙ (a − t)` and
    /// returns the batch loss `½ Σ (a − t)²`.
    ///
    /// `targets[h]` holds the example-major target vectors of head `h`.
    pub fn output_error(&mut self, targets: &[&[f32]]) -> Result<f32> {
        if targets.len() != self.heads.len() {
            return Err(NetworkError::shape(
                "output heads",
                self.heads.len(),
                targets.len(),
            ));
        }

        let mut loss = 0.0f32;
        for (&i, target) in self.heads.iter().zip(targets) {
            let node = &mut self.nodes[i];
            let len = node.data.batch_size() * node.data.feature_count();
            if target.len() < len {
                return Err(NetworkError::shape(
                    format!("targets for head '{}'", node.id),
                    len,
                    target.len(),
                ));
            }
            let activation = node.data.activation();
            let slots = node.data.split_mut();
            for k in 0..len {
                let diff = slots.activation[k] - target[k];
                loss += 0.5 * diff * diff;
                slots.error[k] = activation.derivative(slots.inter[k]) * diff;
            }
        }
        Ok(loss)
    }

    /// Back-propagates the seeded output errors and updates every layer.
    ///
    /// Error slots of non-output nodes, merge buffers and the input are
    /// zeroed first.
    pub fn backward(&mut self) -> Result<()> {
        for node in &mut self.nodes {
            if !node.children.is_empty() {
                node.data.fill(Slot::Error, 0.0);
            }
            if let Some(merge) = &mut node.merge {
                merge.data.fill(Slot::Error, 0.0);
            }
        }
        self.input.fill(Slot::Error, 0.0);

        for k in 0..self.backward_order.len() {
            let i = self.backward_order[k];
            self.backward_node(i)?;
        }
        Ok(())
    }

    fn backward_node(&mut self, i: usize) -> Result<()> {
        let parents = self.nodes[i].parents.clone();
        match parents.as_slice() {
            [] => {
                let node = &mut self.nodes[i];
                node.layer.backward(&mut self.input, &node.data)
            }
            [p] => {
                let (parent, node) = pair_mut(&mut self.nodes, *p, i);
                node.layer.backward(&mut parent.data, &node.data)
            }
            many => {
                let mut merge = self.nodes[i].merge.take().ok_or_else(|| {
                    NetworkError::config(self.nodes[i].id.to_string(), "merge point missing")
                })?;
                let result = merge_backward(&mut self.nodes, i, many, &mut merge);
                self.nodes[i].merge = Some(merge);
                result
            }
        }
    }

    /// Trains on `features` (example-major, at least `train_num` examples)
    /// against per-head target vectors.
    pub fn train(&mut self, features: &[f32], targets: &[Vec<f32>]) -> Result<TrainingReport> {
        let train_num = self.config.train_num;
        let input_len = self.input.feature_count();
        if features.len() < train_num * input_len {
            return Err(NetworkError::shape(
                "training features",
                train_num * input_len,
                features.len(),
            ));
        }
        if targets.len() != self.heads.len() {
            return Err(NetworkError::shape(
                "training target heads",
                self.heads.len(),
                targets.len(),
            ));
        }
        let widths: Vec<usize> = self
            .heads
            .iter()
            .map(|&i| self.nodes[i].data.feature_count())
            .collect();
        for (h, (target, &width)) in targets.iter().zip(&widths).enumerate() {
            if target.len() < train_num * width {
                return Err(NetworkError::shape(
                    format!("training targets of head {}", h),
                    train_num * width,
                    target.len(),
                ));
            }
        }

        let batch = self.batch_size;
        let mut order: Vec<usize> = (0..train_num).collect();
        let mut batch_targets: Vec<Vec<f32>> = widths.iter().map(|w| vec![0.0; batch * w]).collect();
        let mut epoch_losses = Vec::with_capacity(self.config.epoch_num);

        for epoch in 0..self.config.epoch_num {
            let start = Instant::now();
            if self.config.shuffle {
                self.rng.shuffle_usize(&mut order);
            }

            let mut total = 0.0f32;
            for chunk in order.chunks(batch) {
                self.set_logical_batch(chunk.len())?;
                for (b, &example) in chunk.iter().enumerate() {
                    self.input
                        .example_mut(Slot::Activation, b)
                        .copy_from_slice(&features[example * input_len..(example + 1) * input_len]);
                    for ((staged, target), &w) in batch_targets.iter_mut().zip(targets).zip(&widths) {
                        staged[b * w..(b + 1) * w]
                            .copy_from_slice(&target[example * w..(example + 1) * w]);
                    }
                }

                self.forward()?;
                let views: Vec<&[f32]> = batch_targets.iter().map(Vec::as_slice).collect();
                let loss = self.output_error(&views)?;
                self.backward()?;
                trace!("epoch {} batch of {}: loss={:.6}", epoch + 1, chunk.len(), loss);
                total += loss;
            }
            self.set_logical_batch(batch)?;

            let mean = total / train_num as f32;
            info!(
                "Epoch {} | loss={:.6} | time={:.3}s",
                epoch + 1,
                mean,
                start.elapsed().as_secs_f32()
            );
            epoch_losses.push(mean);
        }

        Ok(TrainingReport { epoch_losses })
    }

    /// Arg-max class of every example for every head: `result[head][example]`.
    pub fn predict(&mut self, features: &[f32]) -> Result<Vec<Vec<usize>>> {
        let count = self.example_count(features)?;
        let input_len = self.input.feature_count();
        let mut result: Vec<Vec<usize>> = vec![Vec::with_capacity(count); self.heads.len()];

        for chunk in features.chunks(self.batch_size * input_len) {
            self.load_input(chunk)?;
            self.forward()?;
            for (h, &i) in self.heads.iter().enumerate() {
                let data = &self.nodes[i].data;
                for b in 0..data.batch_size() {
                    result[h].push(argmax(data.example(Slot::Activation, b)));
                }
            }
        }
        self.set_logical_batch(self.batch_size)?;
        Ok(result)
    }

    /// Every layer's coefficients, keyed by node id.
    pub fn export_coefficients(&self) -> Value {
        let mut map = Map::new();
        for node in &self.nodes {
            map.insert(node.id.to_string(), node.layer.export_layer());
        }
        Value::Object(map)
    }

    /// Imports coefficients exported by a network of the same structure.
    ///
    /// Nodes are imported in declaration order; on failure the nodes before
    /// the failing one keep their imported values.
    pub fn import_coefficients(&mut self, value: &Value) -> Result<()> {
        let map = value.as_object().ok_or_else(|| {
            NetworkError::coefficients("network", "expected an object keyed by node id")
        })?;
        for node in &mut self.nodes {
            let key = node.id.to_string();
            let coefficients = map
                .get(&key)
                .ok_or_else(|| NetworkError::coefficients(key.as_str(), "missing"))?;
            node.layer
                .import_layer(coefficients)
                .map_err(|err| match err {
                    NetworkError::Coefficients { message, .. } => {
                        NetworkError::coefficients(key.as_str(), message)
                    }
                    other => other,
                })?;
        }
        Ok(())
    }

    pub fn save_coefficients(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.export_coefficients())?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load_coefficients(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let contents = fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&contents)?;
        self.import_coefficients(&value)
    }
}

/// One-hot encodes `labels` into an example-major buffer of `classes` columns.
pub fn one_hot(labels: &[usize], classes: usize) -> Result<Vec<f32>> {
    let mut encoded = vec![0.0f32; labels.len() * classes];
    for (i, &label) in labels.iter().enumerate() {
        if label >= classes {
            return Err(NetworkError::config(
                format!("labels[{}]", i),
                format!("label {} outside 0..{}", label, classes),
            ));
        }
        encoded[i * classes + label] = 1.0;
    }
    Ok(encoded)
}

fn run_forward(layer: &dyn Layer, prev: &LayerData, current: &mut LayerData) -> Result<()> {
    match layer.accelerated() {
        Some(device) => device.forward_on_device(prev, current),
        None => layer.forward(prev, current),
    }
}

fn merge_forward(
    nodes: &mut [Node],
    i: usize,
    parents: &[usize],
    merge: &mut MergePoint,
) -> Result<()> {
    for &p in parents {
        merge
            .merger
            .assign(&nodes[p].id, &nodes[p].data, &mut merge.data)?;
    }
    let node = &mut nodes[i];
    run_forward(&*node.layer, &merge.data, &mut node.data)
}

fn merge_backward(
    nodes: &mut [Node],
    i: usize,
    parents: &[usize],
    merge: &mut MergePoint,
) -> Result<()> {
    {
        let node = &mut nodes[i];
        node.layer.backward(&mut merge.data, &node.data)?;
    }
    let targets = nodes
        .iter_mut()
        .enumerate()
        .filter(|(k, _)| parents.contains(k))
        .map(|(_, node)| (&node.id, &mut node.data));
    merge.merger.distribute(targets, &merge.data)
}

/// Disjoint mutable borrows of two different nodes.
fn pair_mut(nodes: &mut [Node], a: usize, b: usize) -> (&mut Node, &mut Node) {
    debug_assert_ne!(a, b);
    if a < b {
        let (left, right) = nodes.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = nodes.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

fn buffer(
    context: &Option<Arc<ComputeContext>>,
    features: usize,
    batch: usize,
    activation: Activation,
) -> Result<LayerData> {
    match context {
        Some(context) => LayerData::mirrored(context, features, batch, activation, 0, 0),
        None => Ok(LayerData::new(features, batch, activation)),
    }
}

fn merged_shape(parents: &[LayerShape], region: &str, train_num: usize) -> Result<LayerShape> {
    let activation = parents[0].activation;
    if parents.iter().any(|shape| shape.activation != activation) {
        return Err(NetworkError::config(
            region,
            "merged parents must share one activation",
        ));
    }

    let width: usize = parents.iter().map(|shape| shape.output.len()).sum();
    let output = match parents[0].output.image() {
        Some((w, h, _))
            if parents
                .iter()
                .all(|shape| matches!(shape.output.image(), Some((pw, ph, _)) if pw == w && ph == h)) =>
        {
            Shape::Image {
                width: w,
                height: h,
                maps: parents.iter().filter_map(|s| s.output.image()).map(|s| s.2).sum(),
            }
        }
        _ => Shape::Vector(width),
    };

    Ok(LayerShape {
        kind: LayerKind::Merge,
        train_num,
        output,
        activation,
    })
}

fn in_region(region: &str, err: NetworkError) -> NetworkError {
    match err {
        NetworkError::Shape { .. } | NetworkError::Kernel(_) => {
            NetworkError::config(region, err.to_string())
        }
        other => other,
    }
}

/// Kahn's algorithm from `roots`; on a cycle returns a node stuck in it.
fn topological_order(
    roots: &[usize],
    parents: &[Vec<usize>],
    children: &[Vec<usize>],
) -> std::result::Result<Vec<usize>, usize> {
    let mut indegree: Vec<usize> = parents.iter().map(Vec::len).collect();
    let mut queue: VecDeque<usize> = roots.iter().copied().collect();
    let mut order = Vec::with_capacity(parents.len());

    while let Some(i) = queue.pop_front() {
        order.push(i);
        for &child in &children[i] {
            indegree[child] -= 1;
            if indegree[child] == 0 {
                queue.push_back(child);
            }
        }
    }

    if order.len() == parents.len() {
        Ok(order)
    } else {
        Err((0..parents.len())
            .find(|&i| indegree[i] > 0)
            .unwrap_or_default())
    }
}

/// Depth-first post-order: every node after all of its descendants.
fn post_order(roots: &[usize], children: &[Vec<usize>]) -> Vec<usize> {
    let mut visited = vec![false; children.len()];
    let mut order = Vec::with_capacity(children.len());
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for &root in roots {
        if visited[root] {
            continue;
        }
        visited[root] = true;
        stack.push((root, 0));
        while let Some(top) = stack.last_mut() {
            let node = top.0;
            let next = children[node].get(top.1).copied();
            top.1 += 1;
            match next {
                Some(child) if !visited[child] => {
                    visited[child] = true;
                    stack.push((child, 0));
                }
                Some(_) => {}
                None => {
                    order.push(node);
                    stack.pop();
                }
            }
        }
    }
    order
}

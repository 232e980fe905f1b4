use std::collections::HashMap;

use crate::error::{GraphError, GraphResult};

/// Stop identifier (the `stops` primary key).
pub type StopId = i64;

/// Route identifier (the `routes` primary key).
pub type RouteId = i64;

/// Metadata about a stop.
#[derive(Debug, Clone, PartialEq)]
pub struct StopInfo {
    pub name: String,
}

/// A directed, weighted edge as seen from one endpoint.
///
/// For outgoing edges `target` is the destination stop; for incoming edges
/// it is the origin stop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub target: StopId,
    pub weight: f64,
}

/// A neighbor row: ordered (origin, destination) pair plus distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeRecord {
    pub origin: StopId,
    pub destination: StopId,
    pub distance: f64,
}

/// Adjacency entry inside the arena. `slot` indexes `RouteGraph::vertices`,
/// `stop` is kept alongside so lists stay sorted by stop id.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Link {
    pub(crate) slot: usize,
    pub(crate) stop: StopId,
    pub(crate) weight: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct Vertex {
    pub(crate) stop: StopId,
    pub(crate) info: StopInfo,
    /// Sorted by `stop`.
    pub(crate) outgoing: Vec<Link>,
    /// Sorted by `stop`.
    pub(crate) incoming: Vec<Link>,
}

/// Validate a distance before it enters the graph.
pub fn check_weight(weight: f64) -> GraphResult<f64> {
    if weight.is_finite() && weight >= 0.0 {
        Ok(weight)
    } else {
        Err(GraphError::InvalidWeight(weight))
    }
}

/// Weighted directed subgraph of one route.
///
/// Vertices live in an arena (`vertices`) addressed by slot index; `slots`
/// maps stop ids to arena slots. Adjacency lists hold slot indices, so there
/// are no pointer cycles and a clone is a plain deep copy, which is what the
/// service relies on for copy-on-write snapshots. Freed slots are recycled.
///
/// Every edge is stored twice: in `outgoing` of its origin and `incoming` of
/// its destination. Both lists are kept sorted by stop id, which fixes the
/// relaxation order of the path engine independently of insertion order.
#[derive(Debug, Clone)]
pub struct RouteGraph {
    route_id: RouteId,
    vertices: Vec<Option<Vertex>>,
    free: Vec<usize>,
    slots: HashMap<StopId, usize>,
    edge_count: usize,
}

impl RouteGraph {
    pub fn new(route_id: RouteId) -> Self {
        Self {
            route_id,
            vertices: Vec::new(),
            free: Vec::new(),
            slots: HashMap::new(),
            edge_count: 0,
        }
    }

    /// Pre-allocate for a known route size.
    pub fn with_capacity(route_id: RouteId, stop_count: usize) -> Self {
        Self {
            route_id,
            vertices: Vec::with_capacity(stop_count),
            free: Vec::new(),
            slots: HashMap::with_capacity(stop_count),
            edge_count: 0,
        }
    }

    pub fn route_id(&self) -> RouteId {
        self.route_id
    }

    /// Register a stop as a vertex.
    pub fn add_stop(&mut self, stop: StopId, name: impl Into<String>) -> GraphResult<()> {
        if self.slots.contains_key(&stop) {
            return Err(GraphError::DuplicateStop(stop));
        }
        let vertex = Vertex {
            stop,
            info: StopInfo { name: name.into() },
            outgoing: Vec::new(),
            incoming: Vec::new(),
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.vertices[slot] = Some(vertex);
                slot
            }
            None => {
                self.vertices.push(Some(vertex));
                self.vertices.len() - 1
            }
        };
        self.slots.insert(stop, slot);
        Ok(())
    }

    /// Rename a stop. The name is informational; it never affects traversal.
    pub fn set_stop_name(&mut self, stop: StopId, name: impl Into<String>) -> GraphResult<()> {
        let slot = self.require(stop)?;
        if let Some(vertex) = self.vertices[slot].as_mut() {
            vertex.info.name = name.into();
        }
        Ok(())
    }

    /// Remove a stop and every edge where it is origin or destination.
    ///
    /// Returns the number of edges removed, or None if the stop is absent.
    pub fn remove_stop(&mut self, stop: StopId) -> Option<usize> {
        let slot = self.slots.remove(&stop)?;
        let vertex = self.vertices[slot].take()?;
        self.free.push(slot);

        let mut removed = 0;
        for link in &vertex.outgoing {
            if link.slot != slot {
                if let Some(peer) = self.vertices[link.slot].as_mut() {
                    peer.incoming.retain(|l| l.slot != slot);
                }
            }
            removed += 1;
        }
        for link in &vertex.incoming {
            // A self-loop was already counted on the outgoing side.
            if link.slot != slot {
                if let Some(peer) = self.vertices[link.slot].as_mut() {
                    peer.outgoing.retain(|l| l.slot != slot);
                }
                removed += 1;
            }
        }
        self.edge_count -= removed;
        Some(removed)
    }

    /// Insert a directed edge.
    ///
    /// Fails with `InvalidWeight` for negative or non-finite distances,
    /// `UnknownStop` if either endpoint is not a vertex of this route, and
    /// `Conflict` if the ordered pair already has an edge.
    pub fn add_edge(&mut self, origin: StopId, destination: StopId, weight: f64) -> GraphResult<()> {
        let weight = check_weight(weight)?;
        let from = self.require(origin)?;
        let to = self.require(destination)?;

        let outgoing = &self.vertex(from).outgoing;
        let pos_out = match outgoing.binary_search_by_key(&destination, |l| l.stop) {
            Ok(_) => return Err(GraphError::Conflict { origin, destination }),
            Err(pos) => pos,
        };
        let pos_in = match self.vertex(to).incoming.binary_search_by_key(&origin, |l| l.stop) {
            Ok(_) => return Err(GraphError::Conflict { origin, destination }),
            Err(pos) => pos,
        };

        self.vertex_mut(from).outgoing.insert(
            pos_out,
            Link { slot: to, stop: destination, weight },
        );
        self.vertex_mut(to).incoming.insert(
            pos_in,
            Link { slot: from, stop: origin, weight },
        );
        self.edge_count += 1;
        Ok(())
    }

    /// Change the distance of an existing edge.
    pub fn set_weight(&mut self, origin: StopId, destination: StopId, weight: f64) -> GraphResult<()> {
        let weight = check_weight(weight)?;
        let from = self.require(origin)?;
        let to = self.require(destination)?;

        let out = self
            .vertex(from)
            .outgoing
            .binary_search_by_key(&destination, |l| l.stop)
            .map_err(|_| GraphError::EdgeNotFound { origin, destination })?;
        let inc = self
            .vertex(to)
            .incoming
            .binary_search_by_key(&origin, |l| l.stop)
            .map_err(|_| GraphError::EdgeNotFound { origin, destination })?;

        self.vertex_mut(from).outgoing[out].weight = weight;
        self.vertex_mut(to).incoming[inc].weight = weight;
        Ok(())
    }

    /// Remove a directed edge. Returns false if there was nothing to remove.
    pub fn remove_edge(&mut self, origin: StopId, destination: StopId) -> bool {
        let (Some(&from), Some(&to)) = (self.slots.get(&origin), self.slots.get(&destination)) else {
            return false;
        };
        let Ok(out) = self
            .vertex(from)
            .outgoing
            .binary_search_by_key(&destination, |l| l.stop)
        else {
            return false;
        };
        self.vertex_mut(from).outgoing.remove(out);
        if let Ok(inc) = self
            .vertex(to)
            .incoming
            .binary_search_by_key(&origin, |l| l.stop)
        {
            self.vertex_mut(to).incoming.remove(inc);
        }
        self.edge_count -= 1;
        true
    }

    /// Bulk load neighbor rows. Stops must already be registered.
    pub fn load_edges<I>(&mut self, edges: I) -> GraphResult<usize>
    where
        I: IntoIterator<Item = EdgeRecord>,
    {
        let mut loaded = 0;
        for record in edges {
            self.add_edge(record.origin, record.destination, record.distance)?;
            loaded += 1;
        }
        Ok(loaded)
    }

    pub fn contains_stop(&self, stop: StopId) -> bool {
        self.slots.contains_key(&stop)
    }

    /// Get stop metadata.
    pub fn stop(&self, stop: StopId) -> Option<&StopInfo> {
        self.slots
            .get(&stop)
            .and_then(|&slot| self.vertices[slot].as_ref())
            .map(|v| &v.info)
    }

    /// Distance of the edge origin -> destination, if present.
    pub fn edge_weight(&self, origin: StopId, destination: StopId) -> Option<f64> {
        let &from = self.slots.get(&origin)?;
        let outgoing = &self.vertices[from].as_ref()?.outgoing;
        outgoing
            .binary_search_by_key(&destination, |l| l.stop)
            .ok()
            .map(|i| outgoing[i].weight)
    }

    /// Outgoing edges of a stop, sorted by destination id.
    pub fn neighbors_out(&self, stop: StopId) -> impl Iterator<Item = Edge> + '_ {
        self.links(stop, |v| &v.outgoing)
    }

    /// Incoming edges of a stop, sorted by origin id. `Edge::target` is the origin.
    pub fn neighbors_in(&self, stop: StopId) -> impl Iterator<Item = Edge> + '_ {
        self.links(stop, |v| &v.incoming)
    }

    /// All stop ids, ascending.
    pub fn stop_ids(&self) -> Vec<StopId> {
        let mut ids: Vec<StopId> = self.slots.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Iterate over (stop id, metadata) in arena order.
    pub fn stops_iter(&self) -> impl Iterator<Item = (StopId, &StopInfo)> {
        self.vertices
            .iter()
            .flatten()
            .map(|v| (v.stop, &v.info))
    }

    /// Every edge of the route, in arena order of the origin.
    pub fn edges(&self) -> impl Iterator<Item = EdgeRecord> + '_ {
        self.vertices.iter().flatten().flat_map(|v| {
            v.outgoing.iter().map(move |l| EdgeRecord {
                origin: v.stop,
                destination: l.stop,
                distance: l.weight,
            })
        })
    }

    pub fn stop_count(&self) -> usize {
        self.slots.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Approximate memory usage in bytes.
    pub fn memory_usage(&self) -> usize {
        use std::mem::size_of;

        let arena = self.vertices.capacity() * size_of::<Option<Vertex>>();
        let names: usize = self.stops_iter().map(|(_, info)| info.name.capacity()).sum();
        let links: usize = self
            .vertices
            .iter()
            .flatten()
            .map(|v| (v.outgoing.capacity() + v.incoming.capacity()) * size_of::<Link>())
            .sum();
        let index = self.slots.capacity() * (size_of::<StopId>() + size_of::<usize>() + 8);

        arena + names + links + index
    }

    // -----------------------------------------------------------------------
    // Arena access for the path engine
    // -----------------------------------------------------------------------

    pub(crate) fn slot_of(&self, stop: StopId) -> Option<usize> {
        self.slots.get(&stop).copied()
    }

    pub(crate) fn slot_capacity(&self) -> usize {
        self.vertices.len()
    }

    pub(crate) fn stop_at(&self, slot: usize) -> StopId {
        self.vertex(slot).stop
    }

    pub(crate) fn out_links(&self, slot: usize) -> &[Link] {
        self.vertices[slot]
            .as_ref()
            .map(|v| v.outgoing.as_slice())
            .unwrap_or(&[])
    }

    pub(crate) fn vertices_iter(&self) -> impl Iterator<Item = &Vertex> {
        self.vertices.iter().flatten()
    }

    fn require(&self, stop: StopId) -> GraphResult<usize> {
        self.slot_of(stop).ok_or(GraphError::UnknownStop {
            route: self.route_id,
            stop,
        })
    }

    // Slots handed out by `slots` always point at occupied entries.
    fn vertex(&self, slot: usize) -> &Vertex {
        match &self.vertices[slot] {
            Some(v) => v,
            None => unreachable!("slot {slot} is registered but empty"),
        }
    }

    fn vertex_mut(&mut self, slot: usize) -> &mut Vertex {
        match &mut self.vertices[slot] {
            Some(v) => v,
            None => unreachable!("slot {slot} is registered but empty"),
        }
    }

    fn links<'a>(
        &'a self,
        stop: StopId,
        side: fn(&Vertex) -> &Vec<Link>,
    ) -> impl Iterator<Item = Edge> + 'a {
        self.slots
            .get(&stop)
            .and_then(|&slot| self.vertices[slot].as_ref())
            .map(|v| side(v).as_slice())
            .unwrap_or(&[])
            .iter()
            .map(|l| Edge {
                target: l.stop,
                weight: l.weight,
            })
    }
}

use crate::{
    CompactHeightfield,
    region::{RegionError, RegionId},
};

/// Distance levels are processed in batches of this many buckets.
const BUCKETS: usize = 8;
/// How many rounds existing regions may grow before new ones are seeded at a level.
const GROW_ROUNDS: u16 = 8;

#[derive(Clone, Copy, Debug)]
struct Seed {
    x: u16,
    z: u16,
    /// `None` once the span has been claimed by a region.
    span: Option<usize>,
}

/// Region and distance-to-seed of every span while the watershed runs.
struct Flood {
    regions: Vec<RegionId>,
    dist: Vec<u16>,
}

impl CompactHeightfield {
    /// Partitions the walkable spans into regions by flooding from the spans farthest from a border.
    ///
    /// Needs [`build_distance_field`](Self::build_distance_field) first. The outermost
    /// `border_size` cells become border regions. Afterwards regions smaller than `min_region_area`
    /// spans are dropped and regions smaller than `merge_region_area` are merged into a neighbor.
    /// Results land in [`CompactSpan::region`](crate::CompactSpan::region) and [`CompactHeightfield::max_region`].
    pub fn build_regions(
        &mut self,
        border_size: u16,
        min_region_area: u16,
        merge_region_area: u16,
    ) -> Result<(), RegionError> {
        let mut flood = Flood {
            regions: vec![RegionId::NONE; self.spans.len()],
            dist: vec![0; self.spans.len()],
        };
        let mut next_region = self.paint_border_regions(border_size, &mut flood.regions);
        self.border_size = border_size;

        let mut buckets: [Vec<Seed>; BUCKETS] = std::array::from_fn(|_| Vec::with_capacity(256));
        let mut fill_stack = Vec::with_capacity(256);
        let mut level = self.max_distance.saturating_add(1) & !1;
        let mut bucket = BUCKETS - 1;
        while level > 0 {
            level = level.saturating_sub(2);
            bucket = (bucket + 1) % BUCKETS;
            if bucket == 0 {
                self.fill_buckets(level, &flood.regions, &mut buckets);
            } else {
                // Seeds left over from the previous level get another chance.
                let (previous, current) = buckets.split_at_mut(bucket);
                current[0].extend(
                    previous[bucket - 1]
                        .iter()
                        .filter(|seed| seed.span.is_some_and(|i| flood.regions[i] == RegionId::NONE)),
                );
            }

            let rounds = (level > 0).then_some(GROW_ROUNDS);
            self.grow_regions(rounds, &mut flood, &mut buckets[bucket]);

            for seed in buckets[bucket].clone() {
                let Some(i) = seed.span else {
                    continue;
                };
                if flood.regions[i] != RegionId::NONE {
                    continue;
                }
                let region = RegionId::from(next_region);
                if self.flood_region((seed.x, seed.z, i), level, region, &mut flood, &mut fill_stack) {
                    if next_region >= RegionId::BORDER_REGION.bits() - 1 {
                        return Err(RegionError::RegionIdOverflow);
                    }
                    next_region += 1;
                }
            }
        }

        // Let the regions swallow whatever is left.
        let mut leftovers = self.unassigned_spans(&flood.regions);
        self.grow_regions(None, &mut flood, &mut leftovers);

        let (max_region, overlaps) = self.merge_and_filter_regions(
            min_region_area,
            merge_region_area,
            next_region,
            &mut flood.regions,
        );
        self.max_region = RegionId::from(max_region);
        if !overlaps.is_empty() {
            tracing::error!("{} overlapping regions.", overlaps.len());
        }

        for (span, region) in self.spans.iter_mut().zip(flood.regions) {
            span.region = region;
        }
        Ok(())
    }

    /// Sorts the unassigned spans into buckets of two distance levels each, starting at `level`.
    /// Spans below the last bucket wait for the next batch.
    fn fill_buckets(&self, level: u16, regions: &[RegionId], buckets: &mut [Vec<Seed>]) {
        buckets.iter_mut().for_each(Vec::clear);
        let top = level / 2;
        for (x, z, i) in self.iter_spans() {
            if !self.areas[i].is_walkable() || regions[i] != RegionId::NONE {
                continue;
            }
            let bucket = top.saturating_sub(self.dist[i] / 2) as usize;
            if let Some(bucket) = buckets.get_mut(bucket) {
                bucket.push(Seed { x, z, span: Some(i) });
            }
        }
    }

    fn unassigned_spans(&self, regions: &[RegionId]) -> Vec<Seed> {
        self.iter_spans()
            .filter(|&(_, _, i)| regions[i] == RegionId::NONE && self.areas[i].is_walkable())
            .map(|(x, z, i)| Seed { x, z, span: Some(i) })
            .collect()
    }

    /// Hands seeds to the closest adjacent region, one ring per round, until nothing changes
    /// or `rounds` is used up.
    fn grow_regions(&self, rounds: Option<u16>, flood: &mut Flood, seeds: &mut [Seed]) {
        for seed in seeds.iter_mut() {
            if seed.span.is_some_and(|i| flood.regions[i] != RegionId::NONE) {
                seed.span = None;
            }
        }

        let mut claimed = Vec::new();
        let mut round = 0;
        loop {
            claimed.clear();
            for seed in seeds.iter_mut() {
                let Some(i) = seed.span else {
                    continue;
                };
                if let Some((region, dist)) = self.nearest_region(seed.x, seed.z, i, flood) {
                    seed.span = None;
                    claimed.push((i, region, dist));
                }
            }
            if claimed.is_empty() {
                break;
            }
            // Applied after the sweep so a round only grows by one ring.
            for &(i, region, dist) in &claimed {
                flood.regions[i] = region;
                flood.dist[i] = dist;
            }
            round += 1;
            if rounds.is_some_and(|rounds| round >= rounds) {
                break;
            }
        }
    }

    /// The adjacent non-border region of the same area with the shortest distance to its seed.
    fn nearest_region(&self, x: u16, z: u16, i: usize, flood: &Flood) -> Option<(RegionId, u16)> {
        let area = self.areas[i];
        (0..4)
            .filter_map(|direction| self.neighbor(x, z, i, direction))
            .map(|(_, _, neighbor)| neighbor)
            .filter(|&neighbor| {
                let region = flood.regions[neighbor];
                self.areas[neighbor] == area && region != RegionId::NONE && !region.is_border()
            })
            .map(|neighbor| (flood.regions[neighbor], flood.dist[neighbor].saturating_add(2)))
            .min_by_key(|&(_, dist)| dist)
    }

    /// Paints `region` over every span connected to `start` whose distance is at least `level - 2`.
    ///
    /// Spans that touch another region, diagonals included, are left alone.
    /// Returns `false` if nothing could be painted.
    fn flood_region(
        &self,
        start: (u16, u16, usize),
        level: u16,
        region: RegionId,
        flood: &mut Flood,
        stack: &mut Vec<(u16, u16, usize)>,
    ) -> bool {
        let area = self.areas[start.2];
        let floor = level.saturating_sub(2);
        stack.clear();
        stack.push(start);
        flood.regions[start.2] = region;
        flood.dist[start.2] = 0;

        let mut painted = 0;
        while let Some((x, z, i)) = stack.pop() {
            if self.touches_other_region(x, z, i, region, &flood.regions) {
                flood.regions[i] = RegionId::NONE;
                continue;
            }
            painted += 1;
            for direction in 0..4 {
                let Some((nx, nz, neighbor)) = self.neighbor(x, z, i, direction) else {
                    continue;
                };
                if self.areas[neighbor] == area
                    && self.dist[neighbor] >= floor
                    && flood.regions[neighbor] == RegionId::NONE
                {
                    flood.regions[neighbor] = region;
                    flood.dist[neighbor] = 0;
                    stack.push((nx, nz, neighbor));
                }
            }
        }
        painted > 0
    }

    fn touches_other_region(
        &self,
        x: u16,
        z: u16,
        i: usize,
        region: RegionId,
        regions: &[RegionId],
    ) -> bool {
        let area = self.areas[i];
        let same_area = |(x, z, n): (u16, u16, usize)| (self.areas[n] == area).then_some((x, z, n));
        let other = |candidate: RegionId| candidate != RegionId::NONE && candidate != region;
        (0..4).any(|direction| {
            let Some((ax, az, a)) = self.neighbor(x, z, i, direction).and_then(&same_area) else {
                return false;
            };
            if regions[a].is_border() {
                return false;
            }
            other(regions[a])
                || self
                    .neighbor(ax, az, a, (direction + 1) & 3)
                    .and_then(&same_area)
                    .is_some_and(|(_, _, b)| other(regions[b]))
        })
    }
}

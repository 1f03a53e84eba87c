use crate::{
    CompactHeightfield,
    region::{RegionError, RegionId},
};

/// Marks a sweep span whose spans touch more than one region in the previous row.
const NULL_NEIGHBOR: u16 = 0xffff;

#[derive(Debug, Clone, Copy, Default)]
struct SweepSpan {
    /// Number of samples connected to the neighbor region.
    sample_count: u16,
    /// The region in the previous row, or [`NULL_NEIGHBOR`].
    neighbor: u16,
    /// The final region id.
    id: u16,
}

impl CompactHeightfield {
    /// Builds region data for the heightfield using simple monotone partitioning.
    ///
    /// Sweeps the field row by row, extending a region from the previous row when every
    /// span of a row segment connects to the same region. This is cheaper than
    /// [`CompactHeightfield::build_regions`] and does not need a distance field,
    /// but produces long thin regions.
    pub fn build_regions_monotone(
        &mut self,
        border_size: u16,
        min_region_area: u16,
        merge_region_area: u16,
    ) -> Result<(), RegionError> {
        let mut src_reg = vec![RegionId::NONE; self.spans.len()];
        let mut id = self.paint_border_regions(border_size, &mut src_reg) as u32;
        self.border_size = border_size;

        let mut sweeps: Vec<SweepSpan> = Vec::with_capacity(self.width.max(self.height) as usize);
        let mut previous_counts: Vec<u16> = Vec::with_capacity(256);

        let border = border_size.min(self.width / 2).min(self.height / 2);
        for z in border..self.height - border {
            // Collect spans from this row.
            previous_counts.clear();
            previous_counts.resize(id as usize + 1, 0);
            sweeps.clear();
            // Sweep id 0 is unused.
            sweeps.push(SweepSpan::default());

            for x in border..self.width - border {
                for i in self.cell_at(x, z).index_range() {
                    let area = self.areas[i];
                    if !area.is_walkable() {
                        continue;
                    }

                    // -x
                    let mut previous_id = 0_u16;
                    if let Some((_, _, a_index)) = self.neighbor(x, z, i, 0) {
                        if !src_reg[a_index].is_border() && self.areas[a_index] == area {
                            previous_id = src_reg[a_index].bits();
                        }
                    }
                    if previous_id == 0 {
                        previous_id = sweeps.len() as u16;
                        sweeps.push(SweepSpan::default());
                    }

                    // -z
                    if let Some((_, _, a_index)) = self.neighbor(x, z, i, 3) {
                        let neighbor_region = src_reg[a_index];
                        if neighbor_region != RegionId::NONE
                            && !neighbor_region.is_border()
                            && self.areas[a_index] == area
                        {
                            let neighbor = neighbor_region.bits();
                            let sweep = &mut sweeps[previous_id as usize];
                            if sweep.neighbor == 0 || sweep.neighbor == neighbor {
                                sweep.neighbor = neighbor;
                                sweep.sample_count += 1;
                                previous_counts[neighbor as usize] += 1;
                            } else {
                                sweep.neighbor = NULL_NEIGHBOR;
                            }
                        }
                    }

                    src_reg[i] = RegionId::from(previous_id);
                }
            }

            // Create unique ID.
            for sweep in sweeps.iter_mut().skip(1) {
                // If the neighbour is set and there is only one continuous connection to it,
                // the sweep will be merged with the previous one, else new region is created.
                if sweep.neighbor != NULL_NEIGHBOR
                    && sweep.neighbor != 0
                    && previous_counts[sweep.neighbor as usize] == sweep.sample_count
                {
                    sweep.id = sweep.neighbor;
                } else {
                    if id >= RegionId::BORDER_REGION.bits() as u32 {
                        return Err(RegionError::RegionIdOverflow);
                    }
                    sweep.id = id as u16;
                    id += 1;
                }
            }

            // Remap IDs
            let sweep_count = sweeps.len() as u16;
            for x in border..self.width - border {
                for i in self.cell_at(x, z).index_range() {
                    let region = src_reg[i].bits();
                    if region > 0 && region < sweep_count {
                        src_reg[i] = RegionId::from(sweeps[region as usize].id);
                    }
                }
            }
        }

        // Merge regions and filter out small regions.
        let (max_region, overlaps) = self.merge_and_filter_regions(
            min_region_area,
            merge_region_area,
            id as u16,
            &mut src_reg,
        );
        self.max_region = RegionId::from(max_region);
        if !overlaps.is_empty() {
            tracing::debug!("{} overlapping monotone regions.", overlaps.len());
        }

        // Store the result out.
        for (span, region) in self.spans.iter_mut().zip(src_reg) {
            span.region = region;
        }
        Ok(())
    }
}

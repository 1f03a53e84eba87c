use glam::Vec3;

use crate::tile_data::Poly;

/// Number of distinct area ids.
pub const MAX_AREAS: usize = 256;

/// Decides which polygons a query may visit and what it costs to cross them.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFilter {
    area_cost: [f32; MAX_AREAS],
    include_flags: u16,
    exclude_flags: u16,
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            area_cost: [1.0; MAX_AREAS],
            include_flags: 0xffff,
            exclude_flags: 0,
        }
    }
}

impl QueryFilter {
    /// The cost multiplier of an area.
    #[inline]
    pub fn area_cost(&self, area: u8) -> f32 {
        self.area_cost[area as usize]
    }

    /// Sets the cost multiplier of an area.
    #[inline]
    pub fn set_area_cost(&mut self, area: u8, cost: f32) {
        self.area_cost[area as usize] = cost;
    }

    /// Polygons need at least one of these flags.
    #[inline]
    pub fn include_flags(&self) -> u16 {
        self.include_flags
    }

    /// Sets the flags of which polygons need at least one.
    #[inline]
    pub fn set_include_flags(&mut self, flags: u16) {
        self.include_flags = flags;
    }

    /// Polygons with any of these flags are skipped.
    #[inline]
    pub fn exclude_flags(&self) -> u16 {
        self.exclude_flags
    }

    /// Sets the flags that exclude polygons.
    #[inline]
    pub fn set_exclude_flags(&mut self, flags: u16) {
        self.exclude_flags = flags;
    }

    /// Returns `true` if queries may visit the polygon.
    #[inline]
    pub fn pass_filter(&self, poly: &Poly) -> bool {
        poly.flags & self.include_flags != 0 && poly.flags & self.exclude_flags == 0
    }

    /// The cost of moving from `a` to `b` across `poly`.
    #[inline]
    pub fn cost(&self, a: Vec3, b: Vec3, poly: &Poly) -> f32 {
        a.distance(b) * self.area_cost[poly.area as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_include_and_exclude() {
        let mut filter = QueryFilter::default();
        let poly = Poly {
            flags: 0b11,
            ..Default::default()
        };
        assert!(filter.pass_filter(&poly));
        filter.set_exclude_flags(0b10);
        assert!(!filter.pass_filter(&poly));
        filter.set_exclude_flags(0);
        filter.set_include_flags(0b100);
        assert!(!filter.pass_filter(&poly));
        assert!(!QueryFilter::default().pass_filter(&Poly::default()));
    }

    #[test]
    fn cost_scales_distance_by_area() {
        let mut filter = QueryFilter::default();
        filter.set_area_cost(3, 2.5);
        let poly = Poly {
            area: 3,
            ..Default::default()
        };
        assert_eq!(filter.cost(Vec3::ZERO, Vec3::new(0.0, 0.0, 2.0), &poly), 5.0);
    }
}

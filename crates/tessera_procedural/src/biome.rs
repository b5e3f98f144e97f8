//! Biome classification: elevation + moisture to biome to tile.

use tessera_core::tile::{detail, Terrain};

/// Climate/terrain classes produced by the natural generator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Biome {
    /// Deep open water.
    Ocean,
    /// Shallow water near shores.
    Shallows,
    /// Sandy shoreline.
    Beach,
    /// Open grassland.
    Grassland,
    /// Dense tree cover.
    Forest,
    /// Dry scrubland.
    Scrub,
    /// Rocky uplands.
    Hills,
    /// Bare peaks.
    Mountain,
    /// High-altitude snow.
    Snowfield,
}

impl Biome {
    /// Classifies a sample. Both inputs are normalized to `[0, 1]`.
    #[must_use]
    pub fn classify(elevation: f32, moisture: f32) -> Self {
        if elevation < 0.28 {
            return Self::Ocean;
        }
        if elevation < 0.34 {
            return Self::Shallows;
        }
        if elevation < 0.38 {
            return Self::Beach;
        }
        if elevation > 0.85 {
            return if moisture > 0.4 { Self::Snowfield } else { Self::Mountain };
        }
        if elevation > 0.7 {
            return Self::Hills;
        }
        if moisture > 0.6 {
            Self::Forest
        } else if moisture < 0.25 {
            Self::Scrub
        } else {
            Self::Grassland
        }
    }

    /// The ground tile for this biome.
    #[must_use]
    pub const fn terrain(self) -> Terrain {
        match self {
            Self::Ocean => Terrain::DeepWater,
            Self::Shallows => Terrain::Water,
            Self::Beach => Terrain::Sand,
            Self::Grassland | Self::Forest => Terrain::Grass,
            Self::Scrub => Terrain::Dirt,
            Self::Hills | Self::Mountain => Terrain::Stone,
            Self::Snowfield => Terrain::Snow,
        }
    }

    /// The detail code scattered on this biome (weighted by the
    /// generator), or `NONE` for barren biomes.
    #[must_use]
    pub const fn scatter_detail(self) -> u8 {
        match self {
            Self::Forest => detail::TREE,
            Self::Grassland => detail::FLOWER,
            Self::Scrub => detail::BUSH,
            Self::Hills | Self::Mountain => detail::ROCK,
            _ => detail::NONE,
        }
    }

    /// Scatter probability per tile.
    #[must_use]
    pub const fn scatter_chance(self) -> f32 {
        match self {
            Self::Forest => 0.22,
            Self::Grassland => 0.04,
            Self::Scrub => 0.08,
            Self::Hills | Self::Mountain => 0.06,
            _ => 0.0,
        }
    }

    /// The elevation level (0..=3) for a normalized elevation sample.
    #[must_use]
    pub fn height_level(elevation: f32) -> u8 {
        if elevation > 0.85 {
            3
        } else if elevation > 0.7 {
            2
        } else if elevation > 0.55 {
            1
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_bands() {
        assert_eq!(Biome::classify(0.1, 0.5), Biome::Ocean);
        assert_eq!(Biome::classify(0.36, 0.5), Biome::Beach);
        assert_eq!(Biome::classify(0.5, 0.7), Biome::Forest);
        assert_eq!(Biome::classify(0.5, 0.1), Biome::Scrub);
        assert_eq!(Biome::classify(0.5, 0.4), Biome::Grassland);
        assert_eq!(Biome::classify(0.9, 0.2), Biome::Mountain);
        assert_eq!(Biome::classify(0.9, 0.8), Biome::Snowfield);
    }

    #[test]
    fn test_water_biomes_map_to_water_tiles() {
        assert!(Biome::Ocean.terrain().collision().is_water());
        assert!(Biome::Shallows.terrain().collision().is_water());
        assert!(!Biome::Beach.terrain().collision().is_water());
    }

    #[test]
    fn test_height_levels_monotonic() {
        let mut last = 0;
        for i in 0..=20 {
            let h = Biome::height_level(i as f32 / 20.0);
            assert!(h >= last);
            last = h;
        }
        assert_eq!(last, 3);
    }
}

//! End-to-end run: raw folders -> masked folders -> composites -> COGs -> hexagons.

use crate::core::{
    CloudMaskingEngine, CompositeParams, HexagonParams, HexagonalAggregator, MaskingParams, SeasonalCompositeBuilder,
};
use crate::io::{convert_folder_to_cog, read_aoi, write_hexagons};
use crate::types::{LstError, LstResult};
use std::path::{Path, PathBuf};

/// Parameters of every stage
#[derive(Debug, Clone, Default)]
pub struct PipelineParams {
    pub masking: MaskingParams,
    pub composite: CompositeParams,
    pub hexagons: HexagonParams,
}

/// What a full run produced
#[derive(Debug, Clone, Default)]
pub struct PipelineSummary {
    pub masked_folders: Vec<PathBuf>,
    pub composites: Vec<PathBuf>,
    pub cogs: Vec<PathBuf>,
    pub hexagon_count: usize,
    /// Regions that dropped out, with the reason
    pub failed_regions: Vec<(PathBuf, String)>,
}

pub struct LstPipeline {
    masking: CloudMaskingEngine,
    compositing: SeasonalCompositeBuilder,
    aggregation: HexagonalAggregator,
}

impl LstPipeline {
    pub fn new(params: PipelineParams) -> LstResult<Self> {
        Ok(Self {
            masking: CloudMaskingEngine::with_params(params.masking)?,
            compositing: SeasonalCompositeBuilder::with_params(params.composite),
            aggregation: HexagonalAggregator::new(params.hexagons)?,
        })
    }

    /// Run all stages for the given raw region folders and write the hexagon layer to `output_geojson`
    pub fn run<P: AsRef<Path>>(
        &self,
        raw_folders: &[P],
        aoi_geojson: &Path,
        output_geojson: &Path,
    ) -> LstResult<PipelineSummary> {
        let aoi = read_aoi(aoi_geojson)?;
        let mut summary = PipelineSummary::default();

        for (folder, result) in self.masking.process_folders(raw_folders) {
            match result {
                Ok(report) if !report.written.is_empty() => summary.masked_folders.push(report.output_folder),
                Ok(_) => summary
                    .failed_regions
                    .push((folder, "no cleaned raster was written".to_string())),
                Err(e) => summary.failed_regions.push((folder, e.to_string())),
            }
        }

        for (folder, result) in self.compositing.build_for_folders(&summary.masked_folders) {
            match result {
                Ok(path) => summary.composites.push(path),
                Err(e) => summary.failed_regions.push((folder, e.to_string())),
            }
        }
        if summary.composites.is_empty() {
            return Err(LstError::EmptyInput("no composite could be built".to_string()));
        }

        summary.cogs = convert_folder_to_cog(&self.compositing.params().output_dir)?;

        let rows = self
            .aggregation
            .aggregate_folder(&self.compositing.params().output_dir, &aoi)?;
        write_hexagons(&rows, output_geojson)?;
        summary.hexagon_count = rows.len();

        log::info!(
            "✅ Pipeline finished: {} composites, {} hexagons, {} failed regions",
            summary.composites.len(),
            summary.hexagon_count,
            summary.failed_regions.len()
        );
        Ok(summary)
    }
}

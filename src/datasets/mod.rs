//! Dataset adapters.
//!
//! Each adapter parses its annotation source when constructed and then
//! serves the four frame lists to the [`Processor`](crate::processor::Processor).

pub mod car;
pub mod co3d;
pub mod linemod;
pub mod onepose;

use anyhow::Result;

pub use car::CarAdapter;
pub use co3d::Co3dAdapter;
pub use linemod::LinemodAdapter;
pub use onepose::OneposeAdapter;

use crate::config::JobSpec;
use crate::processor::DatasetAdapter;
use crate::segmentation::{MaskSynthesizer, OnnxSegmentationModel};

/// Build the adapter a job asks for.
pub fn build_adapter(job: &JobSpec) -> Result<Box<dyn DatasetAdapter>> {
    let adapter: Box<dyn DatasetAdapter> = match job {
        JobSpec::Co3d {
            config,
            sequence_name,
            category,
        } => Box::new(Co3dAdapter::new(config.clone(), sequence_name, category)?),
        JobSpec::Linemod {
            config,
            object_index,
        } => Box::new(LinemodAdapter::new(config.clone(), *object_index)?),
        JobSpec::Onepose { config, split } => Box::new(OneposeAdapter::new(config.clone(), *split)?),
        JobSpec::Car {
            config,
            segmentation_model,
        } => {
            let adapter = CarAdapter::new(config.clone())?;
            match segmentation_model {
                Some(path) => {
                    let model = OnnxSegmentationModel::load(path)?;
                    Box::new(adapter.with_mask_predictor(Box::new(MaskSynthesizer::new(model))))
                }
                None => Box::new(adapter),
            }
        }
    };
    Ok(adapter)
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Virtual scanner. Renders synthetic text-like pages so the whole acquisition
// path can run without hardware.
//
// Device ids:
//   virtual           flatbed + feeder + duplex, three sheets in the feeder
//   virtual:N         same, with N sheets
//   virtual-flatbed   flatbed only
//   virtual-busy      every page start fails with a busy device

use scanwerk_core::error::{DeviceErrorKind, Result, ScanError};
use scanwerk_core::{
    BitDepth, CancelToken, DeviceCaps, Driver, FrameFormat, PageSize, RawFrame, ScanDevice,
    ScanRequest,
};
use tracing::{debug, instrument};

use crate::driver::{FrameStream, PageFeed, PageSource, ScanDriver, Transfer};

const DEFAULT_SHEETS: u32 = 3;

/// Progress reported before each page completes.
const PROGRESS_STEPS: [f64; 4] = [0.25, 0.5, 0.75, 1.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VirtualModel {
    Feeder { sheets: u32 },
    Flatbed,
    Busy,
}

impl VirtualModel {
    fn parse(id: &str) -> Option<Self> {
        match id {
            "virtual" => Some(Self::Feeder {
                sheets: DEFAULT_SHEETS,
            }),
            "virtual-flatbed" => Some(Self::Flatbed),
            "virtual-busy" => Some(Self::Busy),
            _ => id
                .strip_prefix("virtual:")
                .and_then(|n| n.parse().ok())
                .map(|sheets| Self::Feeder { sheets }),
        }
    }

    fn caps(&self) -> DeviceCaps {
        match self {
            Self::Flatbed => DeviceCaps::default(),
            Self::Feeder { .. } | Self::Busy => DeviceCaps {
                flatbed: true,
                feeder: true,
                duplex: true,
            },
        }
    }
}

/// The in-tree scanner backend used for development and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct VirtualDriver;

impl VirtualDriver {
    pub fn new() -> Self {
        Self
    }

    fn model(device: &ScanDevice) -> Result<VirtualModel> {
        VirtualModel::parse(&device.id).ok_or_else(|| {
            ScanError::device(
                DeviceErrorKind::NotFound,
                format!("no virtual scanner with id {:?}", device.id),
            )
        })
    }
}

impl ScanDriver for VirtualDriver {
    fn driver(&self) -> Driver {
        Driver::Virtual
    }

    fn list_devices(&self, _request: &ScanRequest) -> Result<Vec<ScanDevice>> {
        Ok(vec![
            ScanDevice::new("virtual", "Virtual Scanner"),
            ScanDevice::new("virtual-flatbed", "Virtual Flatbed"),
            ScanDevice::new("virtual-busy", "Virtual Busy Scanner"),
        ])
    }

    fn caps(&self, device: &ScanDevice) -> Result<DeviceCaps> {
        Ok(Self::model(device)?.caps())
    }

    #[instrument(skip(self, request, cancel), fields(device = ?request.device))]
    fn scan(&self, request: &ScanRequest, cancel: &CancelToken) -> Result<FrameStream> {
        let device = match &request.device {
            Some(device) => device.clone(),
            None => ScanDevice::new("virtual", "Virtual Scanner"),
        };
        let model = Self::model(&device)?;
        let sheets = VirtualSheets::new(model, request);
        debug!(
            width = sheets.width,
            height = sheets.height,
            format = ?sheets.format,
            "Virtual scan starting"
        );
        let feed = PageFeed::new(sheets, model.caps(), request, cancel.clone())?;
        Ok(Box::new(feed))
    }
}

// ---------------------------------------------------------------------------
// Page generation
// ---------------------------------------------------------------------------

struct VirtualSheets {
    model: VirtualModel,
    width: u32,
    height: u32,
    dpi: u32,
    format: FrameFormat,
    fed: u32,
    step: usize,
    page: u32,
}

impl VirtualSheets {
    fn new(model: VirtualModel, request: &ScanRequest) -> Self {
        let dpi = request.dpi_or_default();
        let dims = request.page_size.unwrap_or(PageSize::Letter).dimensions();
        let format = match request.bit_depth {
            BitDepth::Color => FrameFormat::Rgb8,
            BitDepth::Grayscale | BitDepth::BlackAndWhite => FrameFormat::Gray8,
        };
        Self {
            model,
            width: ((dims.width_in * dpi as f64).round() as u32).max(1),
            height: ((dims.height_in * dpi as f64).round() as u32).max(1),
            dpi,
            format,
            fed: 0,
            step: 0,
            page: 0,
        }
    }

    fn render(&self) -> RawFrame {
        let gray = text_page(self.width, self.height, self.page);
        let data = match self.format {
            FrameFormat::Rgb8 => gray.iter().flat_map(|&v| [v, v, v]).collect(),
            _ => gray,
        };
        RawFrame {
            width: self.width,
            height: self.height,
            format: self.format,
            x_dpi: self.dpi,
            y_dpi: self.dpi,
            data,
        }
    }
}

impl PageSource for VirtualSheets {
    fn begin_page(&mut self, page: u32) -> Result<()> {
        match self.model {
            VirtualModel::Busy => Err(ScanError::device(
                DeviceErrorKind::Busy,
                "virtual scanner is in use",
            )),
            VirtualModel::Feeder { sheets } if self.fed >= sheets => Err(ScanError::device(
                DeviceErrorKind::FeederEmpty,
                "virtual feeder is empty",
            )),
            _ => {
                self.fed += 1;
                self.page = page;
                self.step = 0;
                Ok(())
            }
        }
    }

    fn poll_transfer(&mut self) -> Result<Transfer> {
        match PROGRESS_STEPS.get(self.step) {
            Some(&progress) => {
                self.step += 1;
                Ok(Transfer::Progress(progress))
            }
            None => Ok(Transfer::Complete(self.render())),
        }
    }
}

/// Rows of dark "words" on white, with `page` small squares in the top-left
/// corner so pages can be told apart.
fn text_page(width: u32, height: u32, page: u32) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let mut data = vec![255u8; w * h];
    let unit = (w / 60).max(1);
    let mut fill = |x0: usize, y0: usize, x1: usize, y1: usize| {
        for y in y0.min(h)..y1.min(h) {
            data[y * w + x0.min(w)..y * w + x1.min(w)].fill(20);
        }
    };

    let margin = unit * 4;
    let line_pitch = unit * 3;
    let mut y = margin * 2;
    let mut line = 0usize;
    while y + unit < h.saturating_sub(margin) {
        let mut x = margin;
        let mut word = line;
        while x < w.saturating_sub(margin) {
            let len = unit * (2 + word % 5);
            fill(x, y, (x + len).min(w - margin), y + unit);
            x += len + unit;
            word += 3;
        }
        y += line_pitch;
        line += 1;
    }

    for n in 0..page as usize {
        let x = unit + n * unit * 2;
        fill(x, unit, x + unit, unit * 2);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverEvent;
    use scanwerk_core::PaperSource;

    fn request(device: &str, paper_source: PaperSource) -> ScanRequest {
        ScanRequest {
            device: Some(ScanDevice::new(device, device)),
            driver: Driver::Virtual,
            bit_depth: BitDepth::Grayscale,
            dpi: Some(50),
            paper_source,
            ..ScanRequest::default()
        }
    }

    fn collect(request: &ScanRequest) -> Vec<Result<DriverEvent>> {
        VirtualDriver::new()
            .scan(request, &CancelToken::new())
            .expect("scan")
            .collect()
    }

    #[test]
    fn numbered_feeder_yields_that_many_pages() {
        let events = collect(&request("virtual:4", PaperSource::Feeder));
        let frames: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                Ok(DriverEvent::Frame(f)) => Some(f),
                _ => None,
            })
            .collect();
        assert_eq!(frames.len(), 4);
        // Letter at 50 dpi.
        assert_eq!((frames[0].width, frames[0].height), (425, 550));
        assert_ne!(frames[0].data, frames[1].data);
    }

    #[test]
    fn color_frames_carry_three_channels() {
        let mut req = request("virtual-flatbed", PaperSource::Flatbed);
        req.bit_depth = BitDepth::Color;
        let frame = collect(&req)
            .into_iter()
            .find_map(|e| match e {
                Ok(DriverEvent::Frame(f)) => Some(f),
                _ => None,
            })
            .expect("frame");
        assert_eq!(frame.format, FrameFormat::Rgb8);
        frame.validate().expect("valid frame");
    }

    #[test]
    fn flatbed_model_rejects_feeder() {
        let result = VirtualDriver::new().scan(
            &request("virtual-flatbed", PaperSource::Feeder),
            &CancelToken::new(),
        );
        assert!(matches!(result, Err(ScanError::NoFeederSupport)));
    }

    #[test]
    fn busy_model_reports_busy() {
        let events = collect(&request("virtual-busy", PaperSource::Flatbed));
        assert!(matches!(&events[..], [Err(e)] if e.is_device(DeviceErrorKind::Busy)));
    }

    #[test]
    fn unknown_id_is_not_found() {
        let result = VirtualDriver::new().scan(
            &request("flatbed-9000", PaperSource::Flatbed),
            &CancelToken::new(),
        );
        assert!(matches!(result, Err(e) if e.is_device(DeviceErrorKind::NotFound)));
    }
}

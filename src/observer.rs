use std::io::Write;

use tokio::sync::mpsc;

use crate::filter::Sighting;

/// Receives positions that passed the filter.
///
/// Delivery is fire-and-forget: the session doesn't wait on, or care about,
/// what the observer does with a sighting.
pub trait Observer {
    fn observe(&mut self, sighting: &Sighting);
}

impl<T: ?Sized + Observer> Observer for Box<T> {
    fn observe(&mut self, sighting: &Sighting) {
        T::observe(&mut **self, sighting)
    }
}

/// Logs every sighting at info level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn observe(&mut self, sighting: &Sighting) {
        let Sighting {
            callsign,
            sender,
            latitude,
            longitude,
            altitude,
        } = sighting;

        if let Some(altitude) = altitude {
            tracing::info!(%callsign, %sender, latitude, longitude, altitude, "position");
        }
        else {
            tracing::info!(%callsign, %sender, latitude, longitude, "position");
        }
    }
}

/// Writes every sighting as one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesObserver<W> {
    writer: W,
}

impl<W: Write> JsonLinesObserver<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write(&mut self, sighting: &Sighting) -> Result<(), std::io::Error> {
        serde_json::to_writer(&mut self.writer, sighting)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

impl<W: Write> Observer for JsonLinesObserver<W> {
    fn observe(&mut self, sighting: &Sighting) {
        if let Err(error) = self.write(sighting) {
            tracing::warn!(?error, "failed to write sighting");
        }
    }
}

/// Forwards sightings into a channel. A closed receiver is ignored.
impl Observer for mpsc::UnboundedSender<Sighting> {
    fn observe(&mut self, sighting: &Sighting) {
        let _ = self.send(sighting.clone());
    }
}

use gauntlet::board::StandardBoardFactory;
use gauntlet::book::{FenBook, NoBook, OpeningBook};
use gauntlet::cli;
use gauntlet::engine::UciEngineFactory;
use gauntlet::tournament::TourManager;
use log::info;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn main() -> anyhow::Result<()> {
    flexi_logger::Logger::try_with_env().unwrap().start().ok();

    let Some(options) = cli::parse() else {
        return Ok(());
    };
    info!("{:#?}", &options);

    if options.engines.len() < 2 {
        eprintln!("We require at least two engines to be supplied.");
        return Ok(());
    }

    let rng = match options.rand_seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_os_rng(),
    };

    let book: Box<dyn OpeningBook> = match &options.openings {
        Some(path) => Box::new(FenBook::open(path)?),
        None => Box::new(NoBook),
    };

    let participants: Vec<(String, i32)> = options
        .engines
        .iter()
        .map(|e| (e.name.clone(), e.elo))
        .collect();
    let factory = UciEngineFactory::new(options.engines);

    let mut manager = TourManager::new(
        options.tour,
        participants,
        Box::new(factory),
        Box::new(StandardBoardFactory),
        book,
        rng,
    );
    manager.run()
}

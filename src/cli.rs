use crate::engine::EngineConfig;
use crate::tc::TimeControl;
use crate::tournament::{SinkConfig, TourConfig, TourType};
use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub engines: Vec<EngineConfig>,
    pub tour: TourConfig,
    pub rand_seed: Option<u64>,
    pub openings: Option<PathBuf>,
}

fn parse_engine_option(engine: &mut EngineConfig, name: &str, value: &str) {
    match name {
        "name" => {
            engine.name = String::from(value);
        }
        "cmd" => {
            engine.cmd = String::from(value);
        }
        "dir" => {
            engine.dir = String::from(value);
        }
        "arg" => {
            engine.args.push(String::from(value));
        }
        "elo" => match value.parse::<i32>() {
            Ok(value) => engine.elo = value,
            Err(_) => {
                eprintln!("Expected number for elo option");
            }
        },
        other => {
            if let Some(option_name) = other.strip_prefix("option.") {
                engine
                    .uci_options
                    .push((option_name.to_string(), value.to_string()));
            } else {
                eprintln!("Unknown engine option {name}={value}");
            }
        }
    }
}

pub fn parse() -> Option<CliOptions> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    parse_args(&args)
}

fn parse_args(args: &[String]) -> Option<CliOptions> {
    let mut options = CliOptions::default();
    let mut each_options = Vec::<(String, String)>::new();

    let mut it = args.iter().peekable();
    while let Some(flag) = it.next() {
        match flag.as_str() {
            "-version" | "--version" => {
                println!("Gauntlet version {}", env!("CARGO_PKG_VERSION"));
                return None;
            }

            "-tournament" => {
                let Some(value) = it.next() else { break };
                match TourType::from_str(value) {
                    Some(tour_type) => options.tour.tour_type = tour_type,
                    None => {
                        eprintln!(
                            "invalid tournament type {value} (expected roundrobin or knockout)"
                        );
                        return None;
                    }
                }
            }

            "-event" => {
                let Some(value) = it.next() else { break };
                options.tour.event = value.to_string();
            }

            "-site" => {
                let Some(value) = it.next() else { break };
                options.tour.site = value.to_string();
            }

            "-engine" => {
                let mut engine = EngineConfig::default();
                while let Some(option) = it.peek()
                    && !option.starts_with('-')
                    && let Some((name, value)) = option.split_once('=')
                {
                    it.next(); // consume token
                    parse_engine_option(&mut engine, name, value);
                }
                if engine.name.is_empty() {
                    engine.name = engine.cmd.clone();
                }
                options.engines.push(engine);
            }

            "-each" => {
                while let Some(option) = it.peek()
                    && !option.starts_with('-')
                    && let Some((name, value)) = option.split_once('=')
                {
                    it.next(); // consume token
                    each_options.push((name.to_string(), value.to_string()));
                }
            }

            "-tc" => {
                let Some(value) = it.next() else { break };
                match TimeControl::parse(value) {
                    Some(tc) => options.tour.time_control = tc,
                    None => {
                        eprintln!("invalid time control specification {value}");
                        return None;
                    }
                }
            }

            "-timemargin" => {
                let Some(value) = it.next() else { break };
                match value.parse::<u64>() {
                    Ok(ms) => {
                        options.tour.time_control =
                            options.tour.time_control.with_margin(ms as f64 / 1000.0);
                    }
                    Err(_) => {
                        eprintln!("Expected milliseconds for timemargin option");
                        return None;
                    }
                }
            }

            "-games" => {
                let Some(value) = it.next() else { break };
                match value.parse::<u32>() {
                    Ok(games) if games > 0 => options.tour.games_per_pair = games,
                    _ => {
                        eprintln!("invalid games value {value} (must be bigger than zero)");
                        return None;
                    }
                }
            }

            "-concurrency" => {
                let Some(value) = it.next() else { break };
                match value.parse::<usize>() {
                    Ok(n) if n > 0 => options.tour.concurrency = n,
                    _ => {
                        eprintln!("invalid concurrency value {value} (must be bigger than zero)");
                        return None;
                    }
                }
            }

            "-ponder" => {
                options.tour.game.ponder = true;
            }

            "-shuffle" => {
                options.tour.shuffle_players = true;
            }

            "-srand" => {
                let Some(value) = it.next() else { break };
                match value.parse::<u64>() {
                    Ok(seed) => options.rand_seed = Some(seed),
                    Err(_) => {
                        eprintln!("invalid random seed {value} (must be unsigned integer)");
                        return None;
                    }
                }
            }

            "-maxmoves" => {
                let Some(value) = it.next() else { break };
                options.tour.game.adjudication.max_game_length =
                    match value.to_lowercase().as_str() {
                        "inf" | "infinite" => None,
                        _ => match value.parse::<usize>() {
                            Ok(n) if n > 0 => Some(n),
                            _ => {
                                eprintln!(
                                    "invalid maxmoves value {value} (must be non-zero unsigned integer)"
                                );
                                return None;
                            }
                        },
                    };
            }

            "-egtb" => {
                options.tour.game.adjudication.egtb = true;
                while let Some(option) = it.peek()
                    && !option.starts_with('-')
                    && let Some((name, value)) = option.split_once('=')
                {
                    it.next(); // consume token
                    match name {
                        "pieces" => match value.parse::<u32>() {
                            Ok(n) if n > 2 => {
                                options.tour.game.adjudication.egtb_max_pieces = n;
                            }
                            _ => {
                                eprintln!("invalid pieces value {value} for -egtb");
                                return None;
                            }
                        },
                        _ => {
                            eprintln!("Invalid key {name} for -egtb");
                            return None;
                        }
                    }
                }
            }

            "-readygrace" => {
                let Some(value) = it.next() else { break };
                match value.parse::<u32>() {
                    Ok(ticks) => options.tour.game.ready_grace_ticks = ticks,
                    Err(_) => {
                        eprintln!("invalid readygrace value {value}");
                        return None;
                    }
                }
            }

            "-openings" => {
                let Some(value) = it.next() else { break };
                options.openings = Some(PathBuf::from(value));
            }

            "-pgnout" => {
                while let Some(option) = it.peek()
                    && !option.starts_with('-')
                    && let Some((name, value)) = option.split_once('=')
                {
                    it.next(); // consume token
                    match name {
                        "file" => {
                            options.tour.pgn = SinkConfig {
                                enabled: true,
                                path: PathBuf::from(value),
                            };
                        }
                        "rich" => {
                            options.tour.pgn_rich = value == "true";
                        }
                        _ => {
                            eprintln!("Invalid key {name} for -pgnout");
                            return None;
                        }
                    }
                }
                if !options.tour.pgn.enabled {
                    eprintln!("output file required for -pgnout option");
                    return None;
                }
            }

            "-resultlog" => {
                let Some(value) = it.next() else { break };
                options.tour.result_log = SinkConfig {
                    enabled: true,
                    path: PathBuf::from(value),
                };
            }

            "-enginelog" => {
                while let Some(option) = it.peek()
                    && !option.starts_with('-')
                    && let Some((name, value)) = option.split_once('=')
                {
                    it.next(); // consume token
                    match name {
                        "file" => {
                            options.tour.engine_log = SinkConfig {
                                enabled: true,
                                path: PathBuf::from(value),
                            };
                        }
                        "showtime" => {
                            options.tour.engine_log_show_time = value == "true";
                        }
                        _ => {
                            eprintln!("Invalid key {name} for -enginelog");
                            return None;
                        }
                    }
                }
            }

            "-resume" => {
                let Some(value) = it.next() else { break };
                match value.to_lowercase().as_str() {
                    "off" => options.tour.resumable = false,
                    "ask" => {
                        options.tour.resumable = true;
                        options.tour.auto_resume = false;
                    }
                    "auto" => {
                        options.tour.resumable = true;
                        options.tour.auto_resume = true;
                    }
                    _ => {
                        eprintln!("invalid resume mode {value} (expected off, ask or auto)");
                        return None;
                    }
                }
            }

            "-schedule" => {
                let Some(value) = it.next() else { break };
                options.tour.schedule_path = PathBuf::from(value);
            }

            _ => {
                eprintln!("Unknown flag {flag}");
            }
        }
    }

    for (name, value) in each_options {
        for engine in &mut options.engines {
            parse_engine_option(engine, &name, &value);
        }
    }

    Some(options)
}

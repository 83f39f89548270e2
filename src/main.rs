use noema::graph::{ConceptGraph, GraphConfig, CONCEPT_DIMS};
use noema::observer::GraphAdapter;
use noema::prng::Prng;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() >= 2 && (args[1] == "--help" || args[1] == "-h" || args[1] == "help") {
        print_help();
        return;
    }

    let image_path = if args.len() >= 3 && args[1] == "--image" {
        Some(args[2].clone())
    } else {
        None
    };

    // Minimal demo:
    // - seed a small organism vocabulary with fuzzy vectors
    // - repeatedly activate concepts and let co-activation rewire the graph
    // - over time associated concepts grow strong direct relations

    let mut graph = ConceptGraph::new(GraphConfig::default().with_seed(7));
    let mut vecs = Prng::new(1234);

    let vocabulary = [
        ("food", "drive", 0.2),
        ("water", "drive", 0.2),
        ("hunger", "state", 0.4),
        ("thirst", "state", 0.4),
        ("warmth", "comfort", 0.3),
        ("light", "environment", 0.3),
        ("dark", "environment", 0.3),
        ("movement", "action", 0.5),
        ("rest", "action", 0.5),
        ("danger", "threat", 0.6),
        ("pain", "threat", 0.6),
        ("sound", "environment", 0.5),
    ];

    for (name, category, uncertainty) in vocabulary {
        let v: Vec<f32> = (0..CONCEPT_DIMS)
            .map(|_| vecs.gen_range_f32(-1.0, 1.0))
            .collect();
        if let Err(e) = graph.add_concept(name, &v, uncertainty, category) {
            eprintln!("failed to add '{name}': {e}");
            std::process::exit(1);
        }
    }

    // A few innate associations; the rest must be discovered.
    for (a, b, w) in [
        ("hunger", "food", 0.8),
        ("thirst", "water", 0.8),
        ("danger", "pain", 0.7),
        ("danger", "movement", 0.5),
        ("dark", "rest", 0.4),
    ] {
        if let Err(e) = graph.relate(a, b, Some(w)) {
            eprintln!("failed to relate '{a}'-'{b}': {e}");
            std::process::exit(1);
        }
    }

    let params = graph.config().modify_params();
    for tick in 0..60u32 {
        let seed = vocabulary[(tick as usize) % vocabulary.len()].0;
        let trajectory = match graph.activate(seed, 3, 0.1) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("activation failed: {e}");
                std::process::exit(1);
            }
        };
        let active = match trajectory.last() {
            Some(last) => graph.active_set(last),
            None => Vec::new(),
        };
        let touched = graph.auto_modify(&active, &params);

        if tick % 10 == 0 {
            let diag = graph.diagnostics();
            println!(
                "tick={tick:3} seed={seed:<9} active={:2} rewired={touched}  concepts={} relations={} avg_w={:.3}",
                active.len(),
                diag.concept_count,
                diag.relation_count,
                diag.avg_weight,
            );
        }
    }

    println!("\nassociations of 'danger':");
    match graph.similar("danger", 5) {
        Ok(hits) => {
            for (name, score) in hits {
                println!("  {name:<9} {score:+.3}");
            }
        }
        Err(e) => eprintln!("  similarity query failed: {e}"),
    }

    let snapshot = GraphAdapter::new(&graph).snapshot(5);
    match serde_json::to_string_pretty(&snapshot) {
        Ok(json) => println!("\nsnapshot:\n{json}"),
        Err(e) => eprintln!("snapshot serialization failed: {e}"),
    }

    if let Some(path) = image_path {
        let blob = graph.save();
        if let Err(e) = std::fs::write(&path, &blob) {
            eprintln!("failed to write image to {path}: {e}");
            std::process::exit(1);
        }
        println!("\nwrote {} bytes to {path}", blob.len());

        match std::fs::read(&path).map_err(|e| e.to_string()).and_then(|bytes| {
            ConceptGraph::load(&bytes).map_err(|e| e.to_string())
        }) {
            Ok(restored) => println!(
                "reload check: {} concepts, {} relations",
                restored.concept_count(),
                restored.relation_count()
            ),
            Err(e) => {
                eprintln!("reload check failed: {e}");
                std::process::exit(1);
            }
        }
    }
}

fn print_help() {
    println!("noema demo organism");
    println!();
    println!("Usage:");
    println!("  noema                 run the demo loop");
    println!("  noema --image PATH    also save/reload the graph image at PATH");
}
